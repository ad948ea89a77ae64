use crate::field::{Field, Fields};
use crate::scanner::ScanEvent;

/// An AltBeacon advertisement with its last byte missing.
pub const MALFORMED_ALTBEACON: &str = "BEACBEACE858FC8A372B4BEFA05393F98CD4E1770001000140";

/// A complete AltBeacon advertisement.
pub const PROPER_ALTBEACON: &str = "BEACBEACE858FC8A372B4BEFA05393F98CD4E177000100014020";

pub const UUID_HEX: &str = "66484d6e54bf4d67b2698b100151510b";

pub fn hex(src: &str) -> Vec<u8> {
    Field::from_hex(src).unwrap().as_bytes().to_vec()
}

/// uuid, major 1, minor 5
pub fn altbeacon_ids() -> Fields {
    vec![
        Field::from_hex(UUID_HEX).unwrap(),
        Field::from_u16(1),
        Field::from_u16(5),
    ]
}

/// Eddystone-UID frame: namespace 00..09, instance 0a..0f, power -25.
pub fn eddystone_uid_ad() -> Vec<u8> {
    let mut ad = vec![0xaa, 0xfe, 0x00, 0xe7];
    ad.extend(0x00..=0x0f);
    ad.extend([0x00, 0x00]);
    ad
}

/// Eddystone-TLM frame: 3000 mV, 21.5 C, 256 PDUs, 100 s uptime.
pub fn eddystone_tlm_ad() -> Vec<u8> {
    vec![
        0xaa, 0xfe, 0x20, 0x00, // service, frame type, version
        0x0b, 0xb8, // battery
        0x15, 0x80, // temperature
        0x00, 0x00, 0x01, 0x00, // advertising PDU count
        0x00, 0x00, 0x03, 0xe8, // uptime in 0.1 s
    ]
}

pub fn scan_event(bytes: Vec<u8>, device: &str, rssi: i8) -> ScanEvent {
    ScanEvent {
        raw: bytes.clone(),
        bytes,
        device: device.to_string(),
        rssi,
    }
}
