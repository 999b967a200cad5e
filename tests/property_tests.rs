//! Property-based tests for azdht discovery
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// STUN Codec Properties
// ============================================================================

mod stun_properties {
    use super::*;
    use azdht_discovery::nat::{StunAttribute, StunMessage, StunMessageType};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn response_with_attribute(attr_type: u16, value: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x01, 0x01];
        bytes.extend_from_slice(&((4 + value.len()) as u16).to_be_bytes());
        bytes.extend_from_slice(&[0x5a; 16]);
        bytes.extend_from_slice(&attr_type.to_be_bytes());
        bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        bytes.extend_from_slice(value);
        bytes
    }

    proptest! {
        /// Decoding arbitrary bytes never panics
        #[test]
        fn decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = StunMessage::decode(&bytes);
        }

        /// Address attributes whose length is not 8 always fail
        #[test]
        fn address_length_must_be_eight(
            attr_type in prop::sample::select(vec![0x0001u16, 0x0002, 0x0004, 0x0005, 0x000b]),
            value in prop::collection::vec(any::<u8>(), 0..32)
                .prop_filter("not eight bytes", |v| v.len() != 8),
        ) {
            let bytes = response_with_attribute(attr_type, &value);
            prop_assert!(StunMessage::decode(&bytes).is_err());
        }

        /// Mapped addresses survive encode and decode, plain or XORed
        #[test]
        fn mapped_address_roundtrip(
            ip in any::<u32>(),
            port in any::<u16>(),
            transaction_id in any::<[u8; 16]>(),
            xor in any::<bool>(),
        ) {
            let addr = SocketAddrV4::new(Ipv4Addr::from(ip), port);
            let mut msg = StunMessage::new(StunMessageType::BindingResponse, transaction_id);
            msg.add_attribute(if xor {
                StunAttribute::XorMappedAddress(addr)
            } else {
                StunAttribute::MappedAddress(addr)
            });

            let encoded = msg.encode();
            prop_assert_eq!(encoded.len(), 32);

            let decoded = StunMessage::decode(&encoded).unwrap();
            prop_assert_eq!(decoded.reflexive_address(), Some(addr));
            prop_assert_eq!(decoded.transaction_id, transaction_id);
        }

        /// Bytes past the declared attribute section are not parsed
        #[test]
        fn bytes_after_section_ignored(extra in prop::collection::vec(any::<u8>(), 1..16)) {
            let mut bytes = StunMessage::binding_request().encode();
            bytes.extend_from_slice(&extra);

            let decoded = StunMessage::decode(&bytes).unwrap();
            prop_assert!(decoded.attributes.is_empty());
        }
    }
}

// ============================================================================
// Retransmission Schedule Properties
// ============================================================================

mod schedule_properties {
    use super::*;
    use azdht_discovery::nat::RetransmitPolicy;
    use std::time::Duration;

    proptest! {
        /// Each wait is twice the previous one plus the initial interval,
        /// and none exceeds the ceiling
        #[test]
        fn schedule_doubles_plus_initial(initial in 1u64..500, ceiling in 1u64..20_000) {
            let policy = RetransmitPolicy::new(
                Duration::from_millis(initial),
                Duration::from_millis(ceiling),
            );
            let waits: Vec<u64> = policy.schedule().map(|d| d.as_millis() as u64).collect();

            if let Some(first) = waits.first() {
                prop_assert_eq!(*first, initial);
            }
            for pair in waits.windows(2) {
                prop_assert_eq!(pair[1], 2 * pair[0] + initial);
            }
            prop_assert!(waits.iter().all(|w| *w <= ceiling));
            prop_assert_eq!(
                policy.total().as_millis() as u64,
                waits.iter().sum::<u64>()
            );
        }
    }
}

// ============================================================================
// Vivaldi Properties
// ============================================================================

mod vivaldi_properties {
    use super::*;
    use azdht_discovery::vivaldi::{
        ERROR_MIN, PositionType, VivaldiEngine, VivaldiPosition, VivaldiV1, decode_position,
        distance, encode_position, estimate_rtt,
    };

    fn coordinate() -> impl Strategy<Value = VivaldiV1> {
        (-30000.0f32..30000.0, -30000.0f32..30000.0, 0.0f32..30000.0)
            .prop_map(|(x, y, h)| VivaldiV1::new(x, y, h))
    }

    proptest! {
        /// Distance is symmetric
        #[test]
        fn distance_symmetric(a in coordinate(), b in coordinate()) {
            prop_assert_eq!(distance(&a, &b), distance(&b, &a));
        }

        /// A position is its own height twice away from itself
        #[test]
        fn self_distance_is_double_height(a in coordinate()) {
            prop_assert_eq!(distance(&a, &a), (2.0 * a.h).abs());
        }

        /// RTT estimates are NaN exactly when one side is at the origin
        #[test]
        fn estimate_nan_at_origin(a in coordinate(), b in coordinate()) {
            let estimate = estimate_rtt(&a, &b);
            if a.at_origin() || b.at_origin() {
                prop_assert!(estimate.is_nan());
            } else {
                prop_assert_eq!(estimate, distance(&a, &b));
            }
            prop_assert!(estimate_rtt(&a, &VivaldiV1::origin()).is_nan());
        }

        /// V1 encoding is bit exact
        #[test]
        fn v1_codec_exact(
            x in any::<f32>(),
            y in any::<f32>(),
            h in any::<f32>(),
            error in any::<f32>(),
        ) {
            let v1 = VivaldiV1::new(x, y, h).with_error(error);
            let bytes = encode_position(&VivaldiPosition::V1(v1));
            prop_assert_eq!(bytes.len(), 16);

            let decoded = decode_position(PositionType::V1, &bytes).unwrap();
            let decoded = decoded.as_v1().copied().unwrap();
            prop_assert_eq!(decoded.x.to_bits(), x.to_bits());
            prop_assert_eq!(decoded.y.to_bits(), y.to_bits());
            prop_assert_eq!(decoded.h.to_bits(), h.to_bits());
            prop_assert_eq!(decoded.error.to_bits(), error.to_bits());
        }

        /// Updates never leave the bounds or drop the error below its floor
        #[test]
        fn updates_stay_valid(
            seed in any::<u64>(),
            samples in prop::collection::vec(
                (0.1f32..300_000.0, coordinate(), 0.0f32..100.0),
                1..64,
            ),
        ) {
            let mut engine = VivaldiEngine::with_seed(seed);
            for (rtt, peer, peer_error) in samples {
                let report = engine.update(rtt, &peer, peer_error).unwrap();
                prop_assert!(report.position.is_valid());
                prop_assert!(report.position.error >= ERROR_MIN);
                prop_assert!(report.position.error.is_finite());
            }
        }

        /// Rejected samples leave the coordinate untouched
        #[test]
        fn invalid_rtt_no_mutation(
            seed in any::<u64>(),
            peer in coordinate(),
            rtt in prop_oneof![
                -300_000.0f32..=0.0,
                300_000.5f32..1.0e9,
                Just(f32::NAN),
                Just(f32::INFINITY),
            ],
        ) {
            let mut engine = VivaldiEngine::with_seed(seed);
            engine.update(50.0, &VivaldiV1::new(10.0, 10.0, 1.0), 1.0).unwrap();
            let before = engine.position();
            let before_error = engine.error();
            let pending = engine.pending_updates();

            prop_assert!(engine.update(rtt, &peer, 1.0).is_err());
            prop_assert_eq!(engine.position(), before);
            prop_assert_eq!(engine.error().to_bits(), before_error.to_bits());
            prop_assert_eq!(engine.pending_updates(), pending);
        }
    }
}
