//! AltBeacon constructor.

use crate::beacon::Beacon;
use crate::field::{Field, Fields};
use crate::layout::ALTBEACON;
use crate::uuid::Uuid;

/// Value of the reserved byte that follows the measured power.
pub const RESERVED: u8 = 0x20;

/// An AltBeacon with the given identifiers and measured power.
pub fn new(uuid: Uuid, major: u16, minor: u16, power: i8) -> Beacon {
    Beacon::new(
        ALTBEACON,
        ids(uuid, major, minor),
        vec![Field::from_bytes([RESERVED])],
        Field::from_i8(power),
    )
}

/// The uuid, major and minor identifier fields.
pub fn ids(uuid: Uuid, major: u16, minor: u16) -> Fields {
    vec![uuid.into(), Field::from_u16(major), Field::from_u16(minor)]
}
