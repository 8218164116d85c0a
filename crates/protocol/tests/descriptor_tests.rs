//! Integration tests for PHDC class-specific descriptor parsing
//!
//! Covers the compatibility verdict, specialization extraction and the
//! behaviour on malformed or truncated device-supplied streams.

use common::test_utils::DescriptorBuilder;
use protocol::{
    DataCode, DescriptorCursor, DescriptorError, PhdcCapabilities, Specialization,
    parse_class_descriptors, try_parse_class_descriptors,
};

mod compatibility {
    use super::*;

    #[test]
    fn test_reference_example() {
        let buffer = [
            0x05, 0x14, 0x00, 0x01, 0x00, 0x08, 0x10, 0x00, 0x02, 0x04, 0x00, 0x05, 0x00,
        ];
        let caps = parse_class_descriptors(&buffer);
        assert!(caps.compatible);
        assert_eq!(
            caps.specializations,
            vec![Specialization(4), Specialization(5)]
        );
        assert_eq!(
            DescriptorBuilder::new()
                .ieee_20601()
                .specializations(&[0x0004, 0x0005])
                .build(),
            buffer
        );
    }

    #[test]
    fn test_codes_preserved_in_order() {
        let codes = [0x1004, 0x100F, 0x1007, 0x1011];
        let buffer = DescriptorBuilder::new()
            .ieee_20601()
            .specializations(&codes)
            .build();
        let caps = parse_class_descriptors(&buffer);

        assert!(caps.compatible);
        let parsed: Vec<u16> = caps.specializations.iter().map(|s| s.code()).collect();
        assert_eq!(parsed, codes);
    }

    #[test]
    fn test_function_descriptor_before_class_function() {
        let buffer = DescriptorBuilder::new()
            .specializations(&[0x1004])
            .ieee_20601()
            .build();
        let caps = parse_class_descriptors(&buffer);
        assert!(caps.compatible);
        assert_eq!(caps.specializations, vec![Specialization::PULSE_OXIMETER]);
    }

    #[test]
    fn test_vendor_marker_never_compatible() {
        for count in 0..4u16 {
            let codes: Vec<u16> = (0..count).map(|i| 0x1000 + i).collect();
            let buffer = DescriptorBuilder::new()
                .vendor()
                .specializations(&codes)
                .build();
            let caps = parse_class_descriptors(&buffer);
            assert!(!caps.compatible, "count {}", count);
            assert_eq!(caps.data_code, Some(DataCode::Vendor));
            assert_eq!(caps.specializations.len(), count as usize);
        }
    }

    #[test]
    fn test_marker_without_specializations() {
        let buffer = DescriptorBuilder::new()
            .ieee_20601()
            .specializations(&[])
            .build();
        let caps = parse_class_descriptors(&buffer);
        assert!(!caps.compatible);
        assert_eq!(caps.data_code, Some(DataCode::Ieee11073_20601));
    }

    #[test]
    fn test_specializations_without_marker() {
        let buffer = DescriptorBuilder::new().specializations(&[0x1004]).build();
        let caps = parse_class_descriptors(&buffer);
        assert!(!caps.compatible);
        assert!(caps.data_code.is_none());
    }

    #[test]
    fn test_last_marker_wins() {
        let vendor_last = DescriptorBuilder::new()
            .ieee_20601()
            .specializations(&[0x1004])
            .vendor()
            .build();
        assert!(!parse_class_descriptors(&vendor_last).compatible);

        let ieee_last = DescriptorBuilder::new()
            .vendor()
            .specializations(&[0x1004])
            .ieee_20601()
            .build();
        assert!(parse_class_descriptors(&ieee_last).compatible);
    }

    #[test]
    fn test_unknown_data_code_keeps_verdict() {
        let buffer = DescriptorBuilder::new()
            .ieee_20601()
            .class_function(0x7F)
            .specializations(&[0x1008])
            .build();
        assert!(parse_class_descriptors(&buffer).compatible);
    }

    #[test]
    fn test_later_function_descriptor_replaces_list() {
        let buffer = DescriptorBuilder::new()
            .ieee_20601()
            .specializations(&[0x1004, 0x1007])
            .specializations(&[0x100F])
            .build();
        let caps = parse_class_descriptors(&buffer);
        assert_eq!(caps.specializations, vec![Specialization::WEIGHING_SCALE]);
    }

    #[test]
    fn test_unrelated_entries_are_skipped() {
        let buffer = DescriptorBuilder::new()
            .qos()
            .ieee_20601()
            .raw(&[0x06, 0x22, 0xDE, 0xAD, 0xBE, 0xEF])
            .specializations(&[0x1011])
            .build();
        let caps = parse_class_descriptors(&buffer);
        assert!(caps.compatible);
        assert_eq!(caps.specializations, vec![Specialization::GLUCOSE_METER]);
    }
}

mod malformed {
    use super::*;

    fn full_stream() -> Vec<u8> {
        DescriptorBuilder::new()
            .ieee_20601()
            .specializations(&[0x0004, 0x0005])
            .build()
    }

    #[test]
    fn test_truncated_reference_example() {
        let caps = parse_class_descriptors(&[0x05, 0x14, 0x00, 0x01]);
        assert_eq!(caps, PhdcCapabilities::incompatible());
        assert!(matches!(
            try_parse_class_descriptors(&[0x05, 0x14, 0x00, 0x01]),
            Err(DescriptorError::Truncated {
                offset: 0,
                needed: 5,
                available: 4
            })
        ));
    }

    #[test]
    fn test_every_truncation_point() {
        let full = full_stream();
        for len in 0..full.len() {
            let caps = parse_class_descriptors(&full[..len]);
            assert!(!caps.compatible, "truncated at {}", len);
        }
        assert!(parse_class_descriptors(&full).compatible);
    }

    #[test]
    fn test_truncation_inside_entries_clears_list() {
        let full = full_stream();
        // Cut inside the function descriptor: the list must not leak through
        for len in 6..full.len() {
            let caps = parse_class_descriptors(&full[..len]);
            assert!(caps.specializations.is_empty(), "truncated at {}", len);
            assert!(caps.data_code.is_none(), "truncated at {}", len);
        }
    }

    #[test]
    fn test_tiny_buffers() {
        for buffer in [&[][..], &[0x05][..], &[0x05, 0x14][..], &[0x01][..], &[0xFF, 0x10][..]] {
            assert_eq!(
                parse_class_descriptors(buffer),
                PhdcCapabilities::incompatible()
            );
        }
    }

    #[test]
    fn test_zero_length_entry_terminates() {
        let mut buffer = DescriptorBuilder::new().ieee_20601().build();
        buffer.extend_from_slice(&[0x00, 0x10, 0x00, 0x01, 0x04, 0x10]);
        assert!(matches!(
            try_parse_class_descriptors(&buffer),
            Err(DescriptorError::InvalidLength { offset: 5, length: 0 })
        ));
        assert!(!parse_class_descriptors(&buffer).compatible);
    }

    #[test]
    fn test_length_one_entry_rejected() {
        let buffer = [0x01, 0x05, 0x14, 0x00, 0x01, 0x00];
        assert!(matches!(
            try_parse_class_descriptors(&buffer),
            Err(DescriptorError::InvalidLength { offset: 0, length: 1 })
        ));
    }

    #[test]
    fn test_class_function_too_short_for_data_code() {
        let buffer = [0x03, 0x14, 0x00];
        assert!(matches!(
            try_parse_class_descriptors(&buffer),
            Err(DescriptorError::Truncated { offset: 3, .. })
        ));
    }

    #[test]
    fn test_count_exceeding_entry() {
        // Entry is 6 bytes (room for one code) but claims 200
        let mut buffer = DescriptorBuilder::new().ieee_20601().build();
        buffer.extend_from_slice(&[0x06, 0x10, 0x00, 200, 0x04, 0x10]);
        buffer.extend_from_slice(&[0u8; 64]);
        assert_eq!(
            try_parse_class_descriptors(&buffer),
            Err(DescriptorError::SpecializationOverrun {
                declared: 200,
                available: 1
            })
        );
    }

    #[test]
    fn test_cursor_stops_at_overlong_entry() {
        let buffer = [0x02, 0x21, 0x09, 0x14, 0x00];
        let mut cursor = DescriptorCursor::new(&buffer);
        assert!(cursor.next().unwrap().is_ok());
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
    }
}
