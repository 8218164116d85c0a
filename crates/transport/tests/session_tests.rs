//! Device session integration tests
//!
//! Opens records through the scripted connector and checks that every
//! failing step unwinds exactly the steps before it.
//!
//! Run with: `cargo test -p transport --test session_tests`

use transport::OpenError;
use transport::test_utils::{FailurePlan, ScriptedConnector, oximeter_record};
use transport::usb::{ClaimedInterface, LinkConnector, Session, SessionOptions};

mod open_sequence {
    use super::*;

    #[test]
    fn test_open_runs_every_step() {
        let (connector, probe) = ScriptedConnector::new();
        let mut record = oximeter_record();

        record.open_session(&connector).unwrap();

        assert!(record.is_open());
        let counters = probe.counters();
        assert_eq!(counters.opens, 1);
        assert_eq!(counters.claims, 1);
        assert_eq!(counters.resets, 1);
        assert_eq!(counters.releases, 0);
        assert_eq!(record.poll_set().map(|set| set.len()), Some(1));
    }

    #[test]
    fn test_open_twice_is_noop() {
        let (connector, probe) = ScriptedConnector::new();
        let mut record = oximeter_record();

        record.open_session(&connector).unwrap();
        record.open_session(&connector).unwrap();

        assert_eq!(probe.counters().opens, 1);
        assert_eq!(probe.counters().claims, 1);
    }

    #[test]
    fn test_reopen_after_close() {
        let (connector, probe) = ScriptedConnector::new();
        let mut record = oximeter_record();

        record.open_session(&connector).unwrap();
        record.close_session();
        assert!(!record.is_open());
        assert_eq!(probe.open_handles(), 0);

        record.open_session(&connector).unwrap();
        assert!(record.is_open());
        assert_eq!(probe.counters().opens, 2);
        assert_eq!(probe.open_handles(), 1);
    }
}

mod open_failures {
    use super::*;

    fn open_with(plan: FailurePlan) -> (OpenError, transport::test_utils::LinkProbe) {
        let (connector, probe) = ScriptedConnector::with_failures(plan);
        let mut record = oximeter_record();
        let err = record.open_session(&connector).unwrap_err();
        assert!(!record.is_open());
        assert!(record.poll_set().is_none());
        (err, probe)
    }

    #[test]
    fn test_device_not_found() {
        let (err, probe) = open_with(FailurePlan {
            connect: true,
            ..FailurePlan::default()
        });

        assert!(matches!(
            err,
            OpenError::DeviceNotFound {
                vendor_id: 0x0483,
                product_id: 0x5750
            }
        ));
        assert_eq!(probe.counters().opens, 0);
    }

    #[test]
    fn test_claim_failure_closes_handle() {
        let (err, probe) = open_with(FailurePlan {
            claim: true,
            ..FailurePlan::default()
        });

        assert!(matches!(
            err,
            OpenError::ClaimInterface {
                interface: 0,
                source: rusb::Error::Busy
            }
        ));
        let counters = probe.counters();
        assert_eq!(counters.opens, 1);
        assert_eq!(counters.closes, 1);
        assert_eq!(counters.releases, 0);
        assert_eq!(probe.open_handles(), 0);
    }

    #[test]
    fn test_reset_failure_releases_claim() {
        let (err, probe) = open_with(FailurePlan {
            reset: true,
            ..FailurePlan::default()
        });

        assert!(matches!(err, OpenError::Reset(rusb::Error::NoDevice)));
        let counters = probe.counters();
        assert_eq!(counters.claims, 1);
        assert_eq!(counters.releases, 1);
        assert_eq!(probe.open_handles(), 0);
    }

    #[test]
    fn test_poll_descriptor_failure_unwinds() {
        let (err, probe) = open_with(FailurePlan {
            poll_descriptors: true,
            ..FailurePlan::default()
        });

        assert!(matches!(err, OpenError::PollDescriptors(_)));
        let counters = probe.counters();
        assert_eq!(counters.resets, 1);
        assert_eq!(counters.releases, 1);
        assert_eq!(probe.open_handles(), 0);
    }

    #[test]
    fn test_empty_poll_set_is_an_error() {
        let (err, probe) = open_with(FailurePlan {
            empty_poll_set: true,
            ..FailurePlan::default()
        });

        assert!(matches!(
            err,
            OpenError::PollDescriptors(rusb::Error::NotSupported)
        ));
        assert_eq!(probe.open_handles(), 0);
    }

    #[test]
    fn test_open_after_release() {
        let (connector, probe) = ScriptedConnector::new();
        let mut record = oximeter_record();
        record.release();

        assert!(matches!(
            record.open_session(&connector),
            Err(OpenError::Released)
        ));
        assert_eq!(probe.counters().opens, 0);
    }
}

mod guards {
    use super::*;

    #[test]
    fn test_claimed_interface_releases_once() {
        let (connector, probe) = ScriptedConnector::new();
        let link = connector.connect(0x0483, 0x5750).unwrap();

        let mut claim = ClaimedInterface::claim(link, 2).unwrap();
        assert_eq!(claim.interface(), 2);
        claim.release();
        claim.release();
        drop(claim);

        let counters = probe.counters();
        assert_eq!(counters.claims, 1);
        assert_eq!(counters.releases, 1);
        assert_eq!(probe.open_handles(), 0);
    }

    #[test]
    fn test_session_drop_releases_in_order() {
        let (connector, probe) = ScriptedConnector::new();
        let session =
            Session::open(&connector, 0x0483, 0x5750, 0, SessionOptions::default()).unwrap();
        assert_eq!(probe.open_handles(), 1);

        session.close();

        let counters = probe.counters();
        assert_eq!(counters.releases, 1);
        assert_eq!(counters.closes, 1);
    }
}
