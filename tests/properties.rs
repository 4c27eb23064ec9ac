//! Crate-level black-box tests for the universal properties of spec §8,
//! exercised purely through the public `Ciphertext`/`SecretKey`/
//! `Permutation` surface across a handful of contexts and seeds.

use std::sync::{Arc, Once};

use certfhe::{Context, Permutation, Plaintext, PolicyConfig, SecretKey};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber once so `RUST_LOG=certfhe=trace cargo test
/// -- --nocapture` surfaces the kernel-dispatch and fusion-decision spans
/// emitted by `threadpool`/`dag` while these tests run.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// `N >= 64, D >= 4` contexts, per spec §8's universal-property quantifier.
fn contexts() -> Vec<(u64, u64)> {
    vec![(128, 4), (256, 8), (1247, 16)]
}

fn rng(seed: u64) -> ChaCha8Rng {
    init_tracing();
    ChaCha8Rng::seed_from_u64(seed)
}

#[test]
fn round_trip_every_bit_in_every_context() {
    for (case_idx, &(n, d)) in contexts().iter().enumerate() {
        let context = Arc::new(Context::new(n, d).unwrap());
        let config = Arc::new(PolicyConfig::default());
        let mut r = rng(case_idx as u64);
        let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);

        for b in [0u8, 1u8] {
            let c = sk.encrypt_with_rng(Plaintext::new(b), Arc::clone(&config), &mut r);
            assert_eq!(sk.decrypt(&c).unwrap(), Plaintext::new(b), "n={n} d={d} b={b}");
        }
    }
}

#[test]
fn additive_homomorphism_matches_xor_truth_table() {
    for (case_idx, &(n, d)) in contexts().iter().enumerate() {
        let context = Arc::new(Context::new(n, d).unwrap());
        let config = Arc::new(PolicyConfig::default());
        let mut r = rng(100 + case_idx as u64);
        let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);

        for b1 in [0u8, 1u8] {
            for b2 in [0u8, 1u8] {
                let c1 = sk.encrypt_with_rng(Plaintext::new(b1), Arc::clone(&config), &mut r);
                let c2 = sk.encrypt_with_rng(Plaintext::new(b2), Arc::clone(&config), &mut r);
                let sum = c1.add(&c2).unwrap();
                assert_eq!(
                    sk.decrypt(&sum).unwrap().value(),
                    b1 ^ b2,
                    "n={n} d={d} {b1}+{b2}"
                );
            }
        }
    }
}

#[test]
fn multiplicative_homomorphism_matches_and_truth_table() {
    for (case_idx, &(n, d)) in contexts().iter().enumerate() {
        let context = Arc::new(Context::new(n, d).unwrap());
        let config = Arc::new(PolicyConfig::default());
        let mut r = rng(200 + case_idx as u64);
        let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);

        for b1 in [0u8, 1u8] {
            for b2 in [0u8, 1u8] {
                let c1 = sk.encrypt_with_rng(Plaintext::new(b1), Arc::clone(&config), &mut r);
                let c2 = sk.encrypt_with_rng(Plaintext::new(b2), Arc::clone(&config), &mut r);
                let product = c1.multiply(&c2).unwrap();
                assert_eq!(
                    sk.decrypt(&product).unwrap().value(),
                    b1 & b2,
                    "n={n} d={d} {b1}*{b2}"
                );
            }
        }
    }
}

#[test]
fn permutation_invariance_under_a_matching_key_permutation() {
    for (case_idx, &(n, d)) in contexts().iter().enumerate() {
        let context = Arc::new(Context::new(n, d).unwrap());
        let config = Arc::new(PolicyConfig::default());
        let mut r = rng(300 + case_idx as u64);
        let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);

        for b in [0u8, 1u8] {
            let c = sk.encrypt_with_rng(Plaintext::new(b), Arc::clone(&config), &mut r);
            let before = sk.decrypt(&c).unwrap();

            let perm = Permutation::random_with_rng(context.n(), &mut r);
            let permuted_c = c.apply_permutation(&perm).unwrap();
            let permuted_sk = sk.apply_permutation(&perm).unwrap();

            assert_eq!(permuted_sk.decrypt(&permuted_c).unwrap(), before, "n={n} d={d} b={b}");
        }
    }
}

#[test]
fn permutation_composition_matches_sequential_application() {
    let context = Arc::new(Context::new(256, 8).unwrap());
    let config = Arc::new(PolicyConfig::default());
    let mut r = rng(400);
    let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);
    let c = sk.encrypt_with_rng(Plaintext::new(1), Arc::clone(&config), &mut r);

    let sigma = Permutation::random_with_rng(context.n(), &mut r);
    let pi = Permutation::random_with_rng(context.n(), &mut r);
    let composed = pi.compose(&sigma).unwrap();

    // permute(c, composed) ...
    let via_composed_ct = c.apply_permutation(&composed).unwrap();
    let via_composed_sk = sk.apply_permutation(&composed).unwrap();

    // ... must decrypt the same as permute(permute(c, sigma), pi) under the
    // correspondingly double-permuted key.
    let via_sequence_ct = c.apply_permutation(&sigma).unwrap().apply_permutation(&pi).unwrap();
    let via_sequence_sk = sk
        .apply_permutation(&sigma)
        .unwrap()
        .apply_permutation(&pi)
        .unwrap();

    assert_eq!(
        via_composed_sk.decrypt(&via_composed_ct).unwrap(),
        via_sequence_sk.decrypt(&via_sequence_ct).unwrap()
    );
}

#[test]
fn inversion_round_trips_a_permuted_ciphertext() {
    let context = Arc::new(Context::new(256, 8).unwrap());
    let config = Arc::new(PolicyConfig::default());
    let mut r = rng(500);
    let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);
    let c = sk.encrypt_with_rng(Plaintext::new(1), Arc::clone(&config), &mut r);
    let expected = sk.decrypt(&c).unwrap();

    let perm = Permutation::random_with_rng(context.n(), &mut r);
    let inv = perm.inverse();

    let round_tripped_ct = c
        .apply_permutation(&perm)
        .unwrap()
        .apply_permutation(&inv)
        .unwrap();
    let round_tripped_sk = sk
        .apply_permutation(&perm)
        .unwrap()
        .apply_permutation(&inv)
        .unwrap();

    assert_eq!(round_tripped_sk.decrypt(&round_tripped_ct).unwrap(), expected);
    // and the un-permuted key/ciphertext pair must still also agree:
    assert_eq!(sk.decrypt(&c).unwrap(), expected);
}

#[test]
fn distributivity_of_multiplication_over_addition() {
    let context = Arc::new(Context::new(256, 8).unwrap());
    let config = Arc::new(PolicyConfig::default());
    let mut r = rng(600);
    let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);

    for a in [0u8, 1u8] {
        for b in [0u8, 1u8] {
            for c_bit in [0u8, 1u8] {
                let ea = sk.encrypt_with_rng(Plaintext::new(a), Arc::clone(&config), &mut r);
                let eb = sk.encrypt_with_rng(Plaintext::new(b), Arc::clone(&config), &mut r);
                let ec = sk.encrypt_with_rng(Plaintext::new(c_bit), Arc::clone(&config), &mut r);

                let lhs = ea.multiply(&eb.add(&ec).unwrap()).unwrap();
                assert_eq!(
                    sk.decrypt(&lhs).unwrap().value(),
                    a & (b ^ c_bit),
                    "a={a} b={b} c={c_bit}"
                );
            }
        }
    }
}

#[test]
fn self_annihilation_under_xor() {
    let context = Arc::new(Context::new(256, 8).unwrap());
    let config = Arc::new(PolicyConfig::default());
    let mut r = rng(700);
    let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);

    for b in [0u8, 1u8] {
        let c = sk.encrypt_with_rng(Plaintext::new(b), Arc::clone(&config), &mut r);
        let sum = c.add(&c).unwrap();
        assert_eq!(sk.decrypt(&sum).unwrap(), Plaintext::new(0));
        // `remove_duplicates_onadd` is on by default: the fast CCC-CCC path
        // doesn't even need cancellation to see this (XOR of equal words is
        // zero), but the normalized deflen must still reflect cancellation.
        assert_eq!(sum.deflen_count(), 0, "a ⊕ a normalizes to the zero node");
    }
}

#[test]
fn idempotence_of_and_on_retained_cmul_nodes() {
    // Force every CCC-CCC pair to stay a DAG node (never fast-materialize)
    // so `enc(b) * enc(b)`'s *second* multiply genuinely exercises CMUL-CMUL
    // fusion's `remove_duplicates_onmul` dedup rather than the fast path.
    let context = Arc::new(Context::new(128, 4).unwrap());
    let config = Arc::new(PolicyConfig {
        max_ccc_size: 0,
        always_default_multiplication: false,
        ..PolicyConfig::default()
    });
    let mut r = rng(800);
    let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);

    let x = sk.encrypt_with_rng(Plaintext::new(1), Arc::clone(&config), &mut r);
    let y = sk.encrypt_with_rng(Plaintext::new(1), Arc::clone(&config), &mut r);

    let e1 = x.multiply(&y).unwrap(); // retained CMUL([x, y])
    let squared = e1.multiply(&e1).unwrap(); // CMUL-CMUL fusion, duplicates cancel

    assert_eq!(squared.deflen_count(), e1.deflen_count());
    assert_eq!(sk.decrypt(&squared).unwrap(), sk.decrypt(&e1).unwrap());
}

#[test]
fn serialize_deserialize_round_trips_decryption() {
    let context = Arc::new(Context::new(128, 4).unwrap());
    let config = Arc::new(PolicyConfig::default());
    let mut r = rng(900);
    let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);

    let ciphertexts: Vec<_> = [1u8, 0, 1, 1]
        .into_iter()
        .map(|b| sk.encrypt_with_rng(Plaintext::new(b), Arc::clone(&config), &mut r))
        .collect();

    let bytes = certfhe::serialize::serialize(&ciphertexts).unwrap();
    let restored = certfhe::serialize::deserialize(&bytes, Arc::clone(&config)).unwrap();

    assert_eq!(restored.len(), ciphertexts.len());
    for (original, back) in ciphertexts.iter().zip(restored.iter()) {
        assert_eq!(sk.decrypt(original).unwrap(), sk.decrypt(back).unwrap());
    }
}

#[test]
fn serialize_deserialize_preserves_shared_subgraph_identity() {
    let context = Arc::new(Context::new(128, 4).unwrap());
    // Force CADD retention so the shared subgraph actually survives as a
    // DAG node instead of fast-materializing into independent CCCs.
    let config = Arc::new(PolicyConfig {
        max_ccc_size: 0,
        ..PolicyConfig::default()
    });
    let mut r = rng(1000);
    let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut r);

    let a = sk.encrypt_with_rng(Plaintext::new(1), Arc::clone(&config), &mut r);
    let b = sk.encrypt_with_rng(Plaintext::new(0), Arc::clone(&config), &mut r);
    let shared = a.add(&b).unwrap();
    let c1 = shared.add(&a).unwrap();
    let c2 = shared.add(&b).unwrap();

    let bytes = certfhe::serialize::serialize(&[c1.clone(), c2.clone()]).unwrap();
    let restored = certfhe::serialize::deserialize(&bytes, Arc::clone(&config)).unwrap();

    // After deserializing, an operation between the two restored ciphertexts
    // that would union guards (because they share `shared`) must union them
    // into one component -- observable by re-serializing the pair without
    // tripping the duplicate-handle check, which only fires within one
    // already-unioned serialize batch when node identity matches.
    assert_eq!(
        sk.decrypt(&restored[0]).unwrap(),
        sk.decrypt(&c1).unwrap()
    );
    assert_eq!(
        sk.decrypt(&restored[1]).unwrap(),
        sk.decrypt(&c2).unwrap()
    );
}
