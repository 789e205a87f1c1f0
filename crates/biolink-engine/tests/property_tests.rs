//! Property-based tests for capture and verify results.
//!
//! These tests use proptest to generate payloads and galleries and check
//! that what leaves the service matches what the sensor produced.

mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use biolink_engine::FnMatcher;
use proptest::prelude::*;
use std::sync::Arc;

/// Payloads small enough to be classified as templates.
fn template_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..2048)
}

/// Distinct gallery entries plus a position to hide the probe at.
fn gallery_with_probe() -> impl Strategy<Value = (Vec<Vec<u8>>, usize)> {
    prop::collection::hash_set(prop::collection::vec(any::<u8>(), 4..32), 1..12)
        .prop_flat_map(|set| {
            let gallery: Vec<Vec<u8>> = set.into_iter().collect();
            let len = gallery.len();
            (Just(gallery), 0..len)
        })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_captured_template_round_trips(payload in template_payload()) {
        let decoded = runtime().block_on(async {
            let rig = common::rig();
            rig.sensor.queue_capture(payload.clone());
            let template = rig.service.capture_template().await.unwrap();
            STANDARD.decode(template).unwrap()
        });

        prop_assert_eq!(decoded, payload);
    }

    #[test]
    fn prop_verify_finds_exact_copy((gallery, position) in gallery_with_probe()) {
        let exact = FnMatcher::new(|a: &[u8], b: &[u8]| if a == b { 100 } else { 0 });
        let probe = STANDARD.encode(&gallery[position]);
        let stored: Vec<String> = gallery.iter().map(|t| STANDARD.encode(t)).collect();

        let result = runtime().block_on(async {
            let rig = common::rig_with(common::fast_config(), Some(Arc::new(exact)));
            rig.service.verify(&probe, &stored).await.unwrap()
        });

        prop_assert!(result.matched);
        prop_assert_eq!(result.score, 100);
        prop_assert_eq!(result.matched_index, Some(position));
    }
}
