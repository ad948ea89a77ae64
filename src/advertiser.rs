//! Advertising generated beacons on local hardware.
//!
//! An [`Advertiser`] takes the full advertisement a layout generated. The
//! first two bytes hold the manufacturer id or service UUID the layout
//! describes; the radio adds those itself, so only the bytes after them are
//! handed to the hardware.

use crate::beacon::Beacon;
use crate::codec::{GenerateError, LayoutSet};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};

/// How long [`Advertiser::stop`] waits for the hardware to drop the
/// advertisement.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors returned by advertisers.
#[derive(Error, Debug)]
pub enum AdvertiseError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    #[error("advertisement is {0} bytes, at least 2 required")]
    TooShort(usize),
    #[error("advertisement still registered after {0:?}")]
    StopTimeout(Duration),
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

/// Future returned by [`Advertiser`] methods.
pub type AdvertiseFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AdvertiseError>> + Send + 'a>>;

/// Hardware that can advertise as a beacon.
pub trait Advertiser: Send {
    /// Advertise `ad` as manufacturer specific data under manufacturer `id`.
    fn advertise_manufacturer_data(&mut self, id: u16, ad: &[u8]) -> AdvertiseFuture<'_>;

    /// Advertise `ad` as service data of the 16-bit service UUID `id`.
    fn advertise_service_data(&mut self, id: u16, ad: &[u8]) -> AdvertiseFuture<'_>;

    /// Stop advertising. Resolves once the hardware has stopped.
    fn stop(&mut self) -> AdvertiseFuture<'_>;
}

/// The part of a generated advertisement after its 16-bit identifier.
pub fn payload(ad: &[u8]) -> Result<&[u8], AdvertiseError> {
    ad.get(2..).ok_or(AdvertiseError::TooShort(ad.len()))
}

/// Generate `beacon` with its layout and start advertising it.
///
/// Layouts with a service matcher are advertised as service data of that
/// UUID; anything else goes out as manufacturer data under `manufacturer_id`.
pub async fn advertise_beacon(
    advertiser: &mut dyn Advertiser,
    layouts: &LayoutSet,
    beacon: &Beacon,
    manufacturer_id: u16,
) -> Result<(), AdvertiseError> {
    let layout = layouts
        .get(&beacon.beacon_type)
        .ok_or_else(|| GenerateError::UnknownLayout(beacon.beacon_type.clone()))?;
    let ad = layout.generate(beacon)?;

    match layout.service_uuid() {
        Some(uuid) => {
            tracing::info!(beacon = %beacon.beacon_type, service = format_args!("{uuid:#06x}"), "Advertising service data");
            advertiser.advertise_service_data(uuid, &ad).await
        }
        None => {
            tracing::info!(beacon = %beacon.beacon_type, manufacturer = format_args!("{manufacturer_id:#06x}"), "Advertising manufacturer data");
            advertiser.advertise_manufacturer_data(manufacturer_id, &ad).await
        }
    }
}

/// Poll `active_instances` until it reports fewer than `before` active
/// advertisements, failing with [`AdvertiseError::StopTimeout`] after `limit`.
#[cfg_attr(not(feature = "bluer"), allow(dead_code))]
pub(crate) async fn wait_for_unregister<F, Fut, E>(
    before: u8,
    limit: Duration,
    mut active_instances: F,
) -> Result<(), AdvertiseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<u8, E>>,
    E: Into<AdvertiseError>,
{
    let unregistered = async {
        while active_instances().await.map_err(Into::<AdvertiseError>::into)? >= before {
            sleep(STOP_POLL_INTERVAL).await;
        }
        Ok::<(), AdvertiseError>(())
    };
    timeout(limit, unregistered)
        .await
        .map_err(|_| AdvertiseError::StopTimeout(limit))?
}

#[cfg(feature = "bluer")]
pub use self::bluez::BluezAdvertiser;

#[cfg(feature = "bluer")]
mod bluez {
    use super::{
        AdvertiseError, AdvertiseFuture, Advertiser, STOP_TIMEOUT, payload, wait_for_unregister,
    };
    use crate::scanner::bluer::service_uuid;
    use bluer::Session;
    use bluer::adv::{Advertisement, AdvertisementHandle, Type};
    use std::collections::BTreeMap;

    impl From<bluer::Error> for AdvertiseError {
        fn from(err: bluer::Error) -> Self {
            AdvertiseError::Bluetooth(err.to_string())
        }
    }

    /// Advertiser using the BlueZ D-Bus advertising API.
    ///
    /// Only one advertisement is active at a time; starting a new one replaces
    /// the previous one.
    pub struct BluezAdvertiser {
        adapter: bluer::Adapter,
        handle: Option<AdvertisementHandle>,
        _session: Session,
    }

    impl BluezAdvertiser {
        /// Open the default adapter and power it on.
        pub async fn new() -> Result<Self, AdvertiseError> {
            let session = Session::new().await?;
            let adapter = session.default_adapter().await?;
            adapter.set_powered(true).await?;
            Ok(BluezAdvertiser {
                adapter,
                handle: None,
                _session: session,
            })
        }

        async fn start(&mut self, advertisement: Advertisement) -> Result<(), AdvertiseError> {
            // Unregisters the previous advertisement
            self.handle.take();
            self.handle = Some(self.adapter.advertise(advertisement).await?);
            Ok(())
        }
    }

    fn broadcast() -> Advertisement {
        Advertisement {
            advertisement_type: Type::Broadcast,
            discoverable: Some(false),
            ..Default::default()
        }
    }

    impl Advertiser for BluezAdvertiser {
        fn advertise_manufacturer_data(&mut self, id: u16, ad: &[u8]) -> AdvertiseFuture<'_> {
            let payload = payload(ad).map(<[u8]>::to_vec);
            Box::pin(async move {
                let advertisement = Advertisement {
                    manufacturer_data: BTreeMap::from([(id, payload?)]),
                    ..broadcast()
                };
                self.start(advertisement).await
            })
        }

        fn advertise_service_data(&mut self, id: u16, ad: &[u8]) -> AdvertiseFuture<'_> {
            let payload = payload(ad).map(<[u8]>::to_vec);
            Box::pin(async move {
                let uuid = service_uuid(id);
                let advertisement = Advertisement {
                    service_uuids: [uuid].into(),
                    service_data: BTreeMap::from([(uuid, payload?)]),
                    ..broadcast()
                };
                self.start(advertisement).await
            })
        }

        fn stop(&mut self) -> AdvertiseFuture<'_> {
            Box::pin(async move {
                let Some(handle) = self.handle.take() else {
                    return Ok(());
                };
                let before = self.adapter.active_advertising_instances().await?;
                // BlueZ unregisters from a background task once the handle drops
                drop(handle);
                if before > 0 {
                    let adapter = &self.adapter;
                    wait_for_unregister(before, STOP_TIMEOUT, || {
                        adapter.active_advertising_instances()
                    })
                    .await?;
                }
                tracing::info!("Advertising stopped");
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::altbeacon;
    use crate::eddystone;
    use crate::test_utils::UUID_HEX;
    use std::collections::VecDeque;

    #[derive(Debug, PartialEq)]
    enum Call {
        Manufacturer(u16, Vec<u8>),
        Service(u16, Vec<u8>),
        Stop,
    }

    #[derive(Default)]
    struct FakeAdvertiser {
        calls: Vec<Call>,
    }

    impl Advertiser for FakeAdvertiser {
        fn advertise_manufacturer_data(&mut self, id: u16, ad: &[u8]) -> AdvertiseFuture<'_> {
            let result = payload(ad).map(|p| self.calls.push(Call::Manufacturer(id, p.to_vec())));
            Box::pin(async move { result })
        }

        fn advertise_service_data(&mut self, id: u16, ad: &[u8]) -> AdvertiseFuture<'_> {
            let result = payload(ad).map(|p| self.calls.push(Call::Service(id, p.to_vec())));
            Box::pin(async move { result })
        }

        fn stop(&mut self) -> AdvertiseFuture<'_> {
            self.calls.push(Call::Stop);
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_payload_strips_identifier() {
        assert_eq!(payload(&[0xaa, 0xfe, 0x10]).unwrap(), &[0x10u8]);
        assert!(payload(&[0xaa, 0xfe]).unwrap().is_empty());
        assert!(matches!(payload(&[0xaa]), Err(AdvertiseError::TooShort(1))));
    }

    #[tokio::test]
    async fn test_advertise_url_as_service_data() {
        let mut adv = FakeAdvertiser::default();
        let beacon = eddystone::url("https://www.google.com", -20).unwrap();

        advertise_beacon(&mut adv, &LayoutSet::defaults(), &beacon, 0x0118)
            .await
            .unwrap();
        adv.stop().await.unwrap();

        let mut expected = vec![0x10, (-20i8) as u8];
        expected.extend(eddystone::compress_url("https://www.google.com").unwrap().as_bytes());
        assert_eq!(adv.calls, vec![Call::Service(0xfeaa, expected), Call::Stop]);
    }

    #[tokio::test]
    async fn test_advertise_altbeacon_as_manufacturer_data() {
        let mut adv = FakeAdvertiser::default();
        let beacon = altbeacon::new(UUID_HEX.parse().unwrap(), 1, 5, -59);

        advertise_beacon(&mut adv, &LayoutSet::defaults(), &beacon, 0x0118)
            .await
            .unwrap();

        let Call::Manufacturer(id, payload) = &adv.calls[0] else {
            panic!("expected manufacturer data, got {:?}", adv.calls);
        };
        assert_eq!(*id, 0x0118);
        assert_eq!(payload.len(), 24);
        assert_eq!(&payload[..2], &[0xbe, 0xac]);
    }

    #[tokio::test]
    async fn test_advertise_unknown_layout() {
        let mut adv = FakeAdvertiser::default();
        let beacon = eddystone::url("https://www.google.com", -20).unwrap();
        let layouts = LayoutSet::new(Vec::new());

        let result = advertise_beacon(&mut adv, &layouts, &beacon, 0x0118).await;
        assert!(matches!(
            result,
            Err(AdvertiseError::Generate(GenerateError::UnknownLayout(_)))
        ));
        assert!(adv.calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_unregister_until_instance_count_drops() {
        let mut counts = VecDeque::from([1u8, 1, 1, 0]);
        let mut polls = 0;
        let result = wait_for_unregister(1, STOP_TIMEOUT, || {
            polls += 1;
            let count = counts.pop_front().unwrap_or(0);
            async move { Ok::<_, AdvertiseError>(count) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(polls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_unregister_times_out() {
        let start = tokio::time::Instant::now();
        let result =
            wait_for_unregister(2, STOP_TIMEOUT, || async { Ok::<_, AdvertiseError>(2) }).await;

        assert!(matches!(result, Err(AdvertiseError::StopTimeout(d)) if d == STOP_TIMEOUT));
        assert_eq!(start.elapsed(), STOP_TIMEOUT);
    }

    #[tokio::test]
    async fn test_wait_for_unregister_propagates_errors() {
        let result = wait_for_unregister(1, STOP_TIMEOUT, || async {
            Err::<u8, _>(AdvertiseError::Bluetooth("adapter gone".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AdvertiseError::Bluetooth(_))));
    }
}
