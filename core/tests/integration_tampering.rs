//! Tampering and misdelivery tests
//!
//! A relay must refuse anything it cannot authenticate as its own layer:
//! foreign keys, corrupted ciphertext, mangled framing. Nothing is
//! forwarded after a failed peel.
//!
//! Run with: cargo test --test integration_tampering

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use onionrelay_core::crypto::IV_SIZE;
use onionrelay_core::privacy::{build_layered_envelope, WRAPPED_KEY_LEN};
use onionrelay_core::relay::PeelStage;
use onionrelay_core::{Circuit, Directory, Envelope, LocalOverlay, RelayError};
use proptest::prelude::*;
use proptest::sample::Index;
use std::sync::OnceLock;

async fn setup() -> (LocalOverlay, Circuit) {
    let overlay = LocalOverlay::default();
    for id in 1..=3 {
        overlay.add_relay(id).await.unwrap();
    }
    overlay.add_user(7).unwrap();

    let listed = overlay.directory().list().await.unwrap();
    let circuit = Circuit::from_hops([listed[0].clone(), listed[1].clone(), listed[2].clone()])
        .unwrap();
    (overlay, circuit)
}

fn wrap(overlay: &LocalOverlay, circuit: &Circuit, message: &str) -> Envelope {
    let topology = overlay.topology();
    build_layered_envelope(circuit, topology, topology.user_address(7), message).unwrap()
}

fn assert_nothing_delivered(overlay: &LocalOverlay) {
    let user = overlay.user(7).unwrap();
    assert_eq!(user.observation().last_received_message, None);
    for id in 2..=3 {
        let relay = overlay.relay(id).unwrap();
        assert_eq!(relay.observation().last_received_encrypted, None);
    }
}

#[tokio::test]
async fn test_flipped_ciphertext_byte_rejected() {
    let (overlay, circuit) = setup().await;
    let envelope = wrap(&overlay, &circuit, "hello");

    // Flip the high bit of the byte that feeds the final padding byte
    let mut blob = BASE64.decode(&envelope.ciphertext).unwrap();
    let idx = blob.len() - IV_SIZE - 1;
    blob[idx] ^= 0x80;
    let tampered = Envelope::new(envelope.wrapped_key, BASE64.encode(blob)).unwrap();

    let entry = overlay.relay(1).unwrap();
    let err = entry.handle_envelope(tampered.encode()).await.unwrap_err();
    assert!(matches!(err, RelayError::PayloadDecryption(_)));
    assert_eq!(err.failed_at(), PeelStage::KeyRecovered);
    assert_eq!(entry.observation().last_destination, None);
    assert_nothing_delivered(&overlay);
}

#[tokio::test]
async fn test_envelope_sent_to_wrong_relay() {
    let (overlay, circuit) = setup().await;
    let envelope = wrap(&overlay, &circuit, "hello");

    let exit = overlay.relay(3).unwrap();
    let err = exit.handle_envelope(envelope.encode()).await.unwrap_err();
    assert!(matches!(err, RelayError::KeyRecovery(_)));
    assert_eq!(overlay.user(7).unwrap().observation().last_received_message, None);
}

#[tokio::test]
async fn test_swapped_wrapped_key_rejected() {
    let (overlay, circuit) = setup().await;
    let first = wrap(&overlay, &circuit, "hello");
    let second = wrap(&overlay, &circuit, "hello");

    // Valid key for relay 1, but for a different ciphertext
    let spliced = Envelope::new(second.wrapped_key, first.ciphertext).unwrap();
    let entry = overlay.relay(1).unwrap();
    let result = entry.handle_envelope(spliced.encode()).await;

    // A wrong AES key almost always breaks the padding; if it does not,
    // the garbage next hop must not reach the recipient
    assert!(result.is_err());
    assert_nothing_delivered(&overlay);
}

#[tokio::test]
async fn test_truncated_and_garbage_messages() {
    let (overlay, _) = setup().await;
    let entry = overlay.relay(1).unwrap();

    let short = "A".repeat(WRAPPED_KEY_LEN - 1);
    assert!(matches!(
        entry.handle_envelope(short).await,
        Err(RelayError::MalformedEnvelope(_))
    ));

    // Right length, but not an RSA ciphertext
    let garbage = "A".repeat(WRAPPED_KEY_LEN + 24);
    assert!(matches!(
        entry.handle_envelope(garbage).await,
        Err(RelayError::KeyRecovery(_))
    ));

    let not_base64 = "!".repeat(WRAPPED_KEY_LEN + 24);
    assert!(entry.handle_envelope(not_base64).await.is_err());

    assert_nothing_delivered(&overlay);
}

#[tokio::test]
async fn test_truncated_ciphertext_rejected() {
    let (overlay, circuit) = setup().await;
    let envelope = wrap(&overlay, &circuit, "hello");

    let mut blob = BASE64.decode(&envelope.ciphertext).unwrap();
    blob.truncate(blob.len() - 5);
    let truncated = Envelope::new(envelope.wrapped_key, BASE64.encode(blob)).unwrap();

    let entry = overlay.relay(1).unwrap();
    let err = entry.handle_envelope(truncated.encode()).await.unwrap_err();
    assert!(matches!(err, RelayError::PayloadDecryption(_)));
    assert_nothing_delivered(&overlay);
}

/// One overlay and one sealed envelope shared by every generated case
fn flip_fixture() -> &'static (LocalOverlay, Envelope) {
    static FIXTURE: OnceLock<(LocalOverlay, Envelope)> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        futures::executor::block_on(async {
            let (overlay, circuit) = setup().await;
            let envelope = wrap(&overlay, &circuit, "hello");
            (overlay, envelope)
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_any_flipped_ciphertext_bit_stops_delivery(bit in any::<Index>()) {
        let (overlay, envelope) = flip_fixture();

        let mut blob = BASE64.decode(&envelope.ciphertext).unwrap();
        let bit = bit.index(blob.len() * 8);
        blob[bit / 8] ^= 1 << (bit % 8);
        let tampered = Envelope::new(envelope.wrapped_key.clone(), BASE64.encode(blob)).unwrap();

        let entry = overlay.relay(1).unwrap();
        let result = futures::executor::block_on(entry.handle_envelope(tampered.encode()));
        prop_assert!(result.is_err(), "bit {} went through", bit);
        prop_assert_eq!(overlay.user(7).unwrap().observation().last_received_message, None);
    }
}
