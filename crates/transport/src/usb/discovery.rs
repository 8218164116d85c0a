//! PHDC device discovery
//!
//! One pass over the bus: every device whose configuration 0 carries a
//! health interface with a compatible class-specific descriptor stream
//! becomes a [`DeviceRecord`]. Devices that cannot be inspected are logged
//! and skipped; nothing about them is changed.

use crate::error::DiscoveryError;
use crate::usb::device::{DeviceIdentity, DeviceRecord};
use crate::usb::session::SessionOptions;
use protocol::{
    DescriptorError, Endpoints, PHDC_INTERFACE_CLASS, PhdcCapabilities, Specialization,
    try_parse_class_descriptors,
};
use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use tracing::{debug, info, trace, warn};

/// Longest string kept from a string descriptor, in bytes
pub const MAX_DESCRIPTOR_STRING: usize = 255;

/// Enumerate the bus and build records for new compatible devices.
///
/// `known` lists the (bus, address) pairs already recorded; those devices
/// are not probed again.
pub(crate) fn scan(
    context: &Context,
    filters: &[String],
    known: &[(u8, u8)],
    options: SessionOptions,
) -> Vec<DeviceRecord> {
    let devices = match context.devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Failed to list USB devices: {}", e);
            return Vec::new();
        }
    };

    let unrecorded = skip_known(devices.iter(), |d| (d.bus_number(), d.address()), known);
    collect_records(
        unrecorded.into_iter().map(|device| {
            let location = (device.bus_number(), device.address());
            (location, probe_device(&device, filters))
        }),
        options,
    )
}

/// Drop the items whose (bus, address) is already in `known`
pub fn skip_known<T>(
    items: impl IntoIterator<Item = T>,
    location: impl Fn(&T) -> (u8, u8),
    known: &[(u8, u8)],
) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| {
            let (bus, address) = location(item);
            let seen = known.contains(&(bus, address));
            if seen {
                trace!("Bus {} address {} already recorded", bus, address);
            }
            !seen
        })
        .collect()
}

/// Keep the compatible records of a scan; failures are logged and skipped
pub fn collect_records(
    outcomes: impl IntoIterator<Item = ((u8, u8), Result<Option<DeviceRecord>, DiscoveryError>)>,
    options: SessionOptions,
) -> Vec<DeviceRecord> {
    let mut records = Vec::new();
    for ((bus, address), outcome) in outcomes {
        match outcome {
            Ok(Some(record)) => {
                info!(
                    "Found PHDC device {:04x}:{:04x} \"{}\" on bus {} address {}",
                    record.vendor_id(),
                    record.product_id(),
                    record.name(),
                    bus,
                    address
                );
                records.push(record.with_options(options));
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping device on bus {} address {}: {}", bus, address, e),
        }
    }
    records
}

/// First alternate setting of one interface in configuration 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceCandidate<'a> {
    pub number: u8,
    pub class_code: u8,
    /// Class-specific descriptor bytes following the interface descriptor
    pub extra: &'a [u8],
    pub endpoints: Endpoints,
}

/// What discovery concluded about a device's interfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceVerdict {
    /// No interface carries the PHDC class
    NoHealthInterface,
    /// The health interface's descriptor stream is malformed
    Malformed {
        interface: u8,
        error: DescriptorError,
    },
    /// Well-formed, but not an 11073-20601 device
    Incompatible {
        interface: u8,
        capabilities: PhdcCapabilities,
    },
    Compatible {
        interface: u8,
        endpoints: Endpoints,
        specializations: Vec<Specialization>,
    },
}

/// Judge the first PHDC-class interface; later ones are never considered
pub fn evaluate_interfaces<'a>(
    candidates: impl IntoIterator<Item = InterfaceCandidate<'a>>,
) -> InterfaceVerdict {
    let Some(health) = candidates
        .into_iter()
        .find(|candidate| candidate.class_code == PHDC_INTERFACE_CLASS)
    else {
        return InterfaceVerdict::NoHealthInterface;
    };

    match try_parse_class_descriptors(health.extra) {
        Err(error) => InterfaceVerdict::Malformed {
            interface: health.number,
            error,
        },
        Ok(capabilities) if !capabilities.compatible => InterfaceVerdict::Incompatible {
            interface: health.number,
            capabilities,
        },
        Ok(capabilities) => InterfaceVerdict::Compatible {
            interface: health.number,
            endpoints: health.endpoints,
            specializations: capabilities.specializations,
        },
    }
}

fn probe_device(
    device: &Device<Context>,
    filters: &[String],
) -> Result<Option<DeviceRecord>, DiscoveryError> {
    let descriptor = device
        .device_descriptor()
        .map_err(DiscoveryError::DeviceDescriptor)?;
    let (vendor_id, product_id) = (descriptor.vendor_id(), descriptor.product_id());

    if !check_filter(vendor_id, product_id, filters) {
        debug!(
            "Device ignored by filter: vid={:#06x}, pid={:#06x}",
            vendor_id, product_id
        );
        return Ok(None);
    }

    let config = device
        .config_descriptor(0)
        .map_err(DiscoveryError::ConfigDescriptor)?;

    let settings: Vec<_> = config
        .interfaces()
        .filter_map(|interface| Some((interface.number(), interface.descriptors().next()?)))
        .collect();
    let candidates = settings.iter().map(|(number, setting)| InterfaceCandidate {
        number: *number,
        class_code: setting.class_code(),
        extra: setting.extra(),
        endpoints: classify_endpoints(
            setting
                .endpoint_descriptors()
                .map(|ep| (ep.address(), ep.transfer_type(), ep.direction())),
        ),
    });

    let (interface_number, endpoints, specializations) = match evaluate_interfaces(candidates) {
        InterfaceVerdict::Compatible {
            interface,
            endpoints,
            specializations,
        } => (interface, endpoints, specializations),
        InterfaceVerdict::NoHealthInterface => {
            trace!("{:04x}:{:04x} has no health interface", vendor_id, product_id);
            return Ok(None);
        }
        InterfaceVerdict::Malformed { interface, error } => {
            debug!(
                "{:04x}:{:04x} interface {} has malformed class descriptors: {}",
                vendor_id, product_id, interface, error
            );
            return Ok(None);
        }
        InterfaceVerdict::Incompatible { capabilities, .. } => {
            debug!(
                "{:04x}:{:04x} is not 11073-20601 compatible (data code {:?}, {} specialization(s))",
                vendor_id,
                product_id,
                capabilities.data_code,
                capabilities.specializations.len()
            );
            return Ok(None);
        }
    };

    let handle = device.open().map_err(DiscoveryError::Open)?;
    handle
        .claim_interface(interface_number)
        .map_err(|source| DiscoveryError::ClaimInterface {
            interface: interface_number,
            source,
        })?;

    let identity = DeviceIdentity {
        vendor_id,
        product_id,
        bus_number: device.bus_number(),
        device_address: device.address(),
        name: read_string(&handle, descriptor.product_string_index()),
        manufacturer: read_string(&handle, descriptor.manufacturer_string_index()),
        serial_number: read_string(&handle, descriptor.serial_number_string_index()),
    };

    if let Err(e) = handle.release_interface(interface_number) {
        debug!("Failed to release interface {}: {}", interface_number, e);
    }
    drop(handle);

    let record = DeviceRecord::new(identity, interface_number, endpoints, specializations)
        .with_device(device.clone());
    Ok(Some(record))
}

/// Check if a VID/PID pair is allowed by the filters
///
/// Filters are `0xVID:0xPID` with `*` wildcards; an empty list allows
/// everything.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        id_matches(filter_vid, vid) && id_matches(filter_pid, pid)
    })
}

fn id_matches(pattern: &str, id: u16) -> bool {
    if pattern == "*" {
        return true;
    }
    let hex = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);
    u16::from_str_radix(hex, 16).is_ok_and(|value| value == id)
}

/// Pick endpoint addresses by (transfer type, direction); the first match
/// per category wins
pub fn classify_endpoints(
    endpoints: impl IntoIterator<Item = (u8, TransferType, Direction)>,
) -> Endpoints {
    let mut found = Endpoints::default();
    for (address, transfer_type, direction) in endpoints {
        let slot = match (transfer_type, direction) {
            (TransferType::Bulk, Direction::In) => &mut found.bulk_in,
            (TransferType::Bulk, Direction::Out) => &mut found.bulk_out,
            (TransferType::Interrupt, Direction::In) => &mut found.interrupt_in,
            _ => continue,
        };
        slot.get_or_insert(address);
    }
    found
}

/// Cut `value` to at most [`MAX_DESCRIPTOR_STRING`] bytes on a char boundary
pub fn truncate_descriptor_string(mut value: String) -> String {
    if value.len() > MAX_DESCRIPTOR_STRING {
        let mut end = MAX_DESCRIPTOR_STRING;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

fn read_string(handle: &DeviceHandle<Context>, index: Option<u8>) -> String {
    index
        .and_then(|index| match handle.read_string_descriptor_ascii(index) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Failed to read string descriptor {}: {}", index, e);
                None
            }
        })
        .map(truncate_descriptor_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{oximeter_record, record_with_endpoints};
    use common::test_utils::{DescriptorBuilder, oximeter_descriptors};
    use std::time::Duration;

    const OXIMETER_ENDPOINTS: Endpoints = Endpoints {
        bulk_in: Some(0x81),
        bulk_out: Some(0x02),
        interrupt_in: Some(0x83),
    };

    fn candidate(number: u8, class_code: u8, extra: &[u8]) -> InterfaceCandidate<'_> {
        InterfaceCandidate {
            number,
            class_code,
            extra,
            endpoints: OXIMETER_ENDPOINTS,
        }
    }

    #[test]
    fn test_filter_logic() {
        let filters = vec!["0x1234:0x5678".to_string(), "0xABCD:*".to_string()];

        assert!(check_filter(0x1234, 0x5678, &filters));
        assert!(check_filter(0xABCD, 0x1111, &filters));
        assert!(check_filter(0xABCD, 0x9999, &filters));

        assert!(!check_filter(0x1234, 0x9999, &filters));
        assert!(!check_filter(0x9999, 0x5678, &filters));
        assert!(!check_filter(0x0000, 0x0000, &filters));

        assert!(check_filter(0x1234, 0x5678, &[]));
    }

    #[test]
    fn test_filter_wildcard_vendor() {
        let filters = vec!["*:0x5750".to_string()];
        assert!(check_filter(0x0483, 0x5750, &filters));
        assert!(!check_filter(0x0483, 0x5751, &filters));
    }

    #[test]
    fn test_classify_first_match_wins() {
        let endpoints = classify_endpoints([
            (0x83, TransferType::Interrupt, Direction::In),
            (0x81, TransferType::Bulk, Direction::In),
            (0x02, TransferType::Bulk, Direction::Out),
            (0x84, TransferType::Bulk, Direction::In),
            (0x03, TransferType::Bulk, Direction::Out),
        ]);
        assert_eq!(endpoints.bulk_in, Some(0x81));
        assert_eq!(endpoints.bulk_out, Some(0x02));
        assert_eq!(endpoints.interrupt_in, Some(0x83));
    }

    #[test]
    fn test_classify_ignores_other_types() {
        let endpoints = classify_endpoints([
            (0x01, TransferType::Interrupt, Direction::Out),
            (0x82, TransferType::Isochronous, Direction::In),
            (0x81, TransferType::Bulk, Direction::In),
        ]);
        assert_eq!(endpoints.bulk_in, Some(0x81));
        assert_eq!(endpoints.bulk_out, None);
        assert_eq!(endpoints.interrupt_in, None);
    }

    #[test]
    fn test_truncate_descriptor_string() {
        assert_eq!(truncate_descriptor_string("Oximeter".into()), "Oximeter");

        let long = "x".repeat(300);
        assert_eq!(truncate_descriptor_string(long).len(), MAX_DESCRIPTOR_STRING);

        let multibyte = format!("{}é", "x".repeat(254));
        assert_eq!(truncate_descriptor_string(multibyte).len(), 254);
    }

    #[test]
    fn test_evaluate_picks_first_health_interface() {
        let compatible = oximeter_descriptors();
        let vendor = DescriptorBuilder::new()
            .vendor()
            .specializations(&[0x1004])
            .build();

        // Audio control, then two PHDC interfaces: only the first one counts
        let verdict = evaluate_interfaces([
            candidate(0, 0x01, &[]),
            candidate(1, PHDC_INTERFACE_CLASS, &compatible),
            candidate(2, PHDC_INTERFACE_CLASS, &vendor),
        ]);
        assert_eq!(
            verdict,
            InterfaceVerdict::Compatible {
                interface: 1,
                endpoints: OXIMETER_ENDPOINTS,
                specializations: vec![Specialization::PULSE_OXIMETER],
            }
        );

        let verdict = evaluate_interfaces([
            candidate(0, PHDC_INTERFACE_CLASS, &vendor),
            candidate(1, PHDC_INTERFACE_CLASS, &compatible),
        ]);
        assert!(matches!(
            verdict,
            InterfaceVerdict::Incompatible { interface: 0, .. }
        ));
    }

    #[test]
    fn test_evaluate_without_health_interface() {
        let extra = oximeter_descriptors();
        assert_eq!(
            evaluate_interfaces([candidate(0, 0x03, &extra), candidate(1, 0xFF, &extra)]),
            InterfaceVerdict::NoHealthInterface
        );
        assert_eq!(
            evaluate_interfaces(Vec::new()),
            InterfaceVerdict::NoHealthInterface
        );
    }

    #[test]
    fn test_evaluate_malformed_stream_is_skipped() {
        let truncated = DescriptorBuilder::new()
            .ieee_20601()
            .raw(&[0x08, protocol::PHD_FUNCTION_DESCRIPTOR, 0x00, 0x02, 0x04])
            .build();
        let verdict = evaluate_interfaces([candidate(3, PHDC_INTERFACE_CLASS, &truncated)]);
        assert!(matches!(
            verdict,
            InterfaceVerdict::Malformed {
                interface: 3,
                error: DescriptorError::Truncated { offset: 5, .. }
            }
        ));
    }

    #[test]
    fn test_evaluate_reports_incompatible_capabilities() {
        let extra = DescriptorBuilder::new().qos().ieee_20601().build();
        match evaluate_interfaces([candidate(0, PHDC_INTERFACE_CLASS, &extra)]) {
            InterfaceVerdict::Incompatible { capabilities, .. } => {
                assert!(capabilities.specializations.is_empty());
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_skip_known_locations() {
        let found = vec![(1u8, 4u8), (1, 5), (2, 4), (1, 4)];
        let fresh = skip_known(found, |location| *location, &[(1, 4), (3, 9)]);
        assert_eq!(fresh, vec![(1, 5), (2, 4)]);

        let all = skip_known([(1u8, 2u8)], |location| *location, &[]);
        assert_eq!(all, vec![(1, 2)]);
    }

    #[test]
    fn test_collect_records_skips_failures() {
        let options = SessionOptions {
            receive_buffer_size: 512,
            read_timeout: Duration::from_millis(250),
        };
        let outcomes = vec![
            ((1, 2), Err(DiscoveryError::DeviceDescriptor(rusb::Error::Io))),
            ((1, 4), Ok(Some(oximeter_record()))),
            ((1, 6), Ok(None)),
            ((1, 7), Err(DiscoveryError::Open(rusb::Error::Access))),
            (
                (1, 8),
                Err(DiscoveryError::ClaimInterface {
                    interface: 0,
                    source: rusb::Error::Busy,
                }),
            ),
            ((1, 5), Ok(Some(record_with_endpoints(Endpoints::default())))),
        ];

        let records = collect_records(outcomes, options);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].product_id(), 0x5750);
        assert_eq!(records[1].product_id(), 0x5751);
        assert!(records.iter().all(|record| record.options() == options));
    }
}
