mod util;

use blstrs::{Bls12, Scalar as Fr};
use ff::Field;
use group::prime::PrimeCurveAffine;
use rand_core::SeedableRng;
use rand_xorshift::XorShiftRng;
use rollzk_cs::{solve, CodecError, HintRegistry, SegmentStore, SolverError};
use rollzk_groth16::groth16::{
    create_random_proof, generate_parameters, generate_parameters_with, load_proof,
    load_proving_key, load_verifying_key, prepare_verifying_key, save_proof, save_proving_key,
    save_verifying_key, setup_with_dump, verify_proof, DecodePolicy, Encoding, KeyPart, KeySource,
    RollProver, StoreKeySource, Trapdoor, FOLD_PARTS,
};
use rollzk_groth16::{ProverError, SetupError};

use util::{lazy_transfer_circuit, public_inputs, transfer_circuit, transfer_inputs};

const SEED: [u8; 16] = [
    0x59, 0x62, 0xbe, 0x5d, 0x76, 0x3d, 0x31, 0x8d, 0x17, 0xdb, 0x37, 0x32, 0x54, 0x06, 0xbc, 0xe5,
];

fn trapdoor() -> Trapdoor<Fr> {
    Trapdoor {
        alpha: Fr::from(11u64),
        beta: Fr::from(13u64),
        gamma: Fr::from(17u64),
        delta: Fr::from(19u64),
        tau: Fr::from(0x1234_5678u64),
    }
}

#[test]
fn test_setup_dump_prove_verify_from_store() {
    let mut rng = XorShiftRng::from_seed(SEED);
    let dir = tempfile::tempdir().unwrap();
    let store = SegmentStore::create(dir.path()).unwrap();

    let cs = lazy_transfer_circuit(24);
    assert!(cs.nb_templates() > 0);
    setup_with_dump::<Bls12, _>(&cs, &store, "s1", Encoding::Raw, &mut rng).unwrap();
    for part in [KeyPart::E].into_iter().chain(FOLD_PARTS) {
        assert!(store.exists(&part.segment("s1")), "{part} missing");
    }

    let inputs = transfer_inputs(24, 3);
    let hints = HintRegistry::with_defaults();
    let source = StoreKeySource::new(store.clone(), "s1", DecodePolicy::Unchecked);
    let proof =
        create_random_proof::<Bls12, _, _>(&cs, &hints, &inputs, &source, &mut rng).unwrap();
    save_proof(&store, "s1", &proof, Encoding::Compressed).unwrap();

    let vk = load_verifying_key::<Bls12>(&store, "s1", DecodePolicy::Checked).unwrap();
    let pvk = prepare_verifying_key(&vk);
    let proof = load_proof::<Bls12>(&store, "s1", DecodePolicy::Checked).unwrap();
    assert!(verify_proof(&pvk, &proof, &public_inputs(&inputs)).unwrap());

    let mut wrong = public_inputs(&inputs);
    wrong[0] += Fr::ONE;
    assert!(!verify_proof(&pvk, &proof, &wrong).unwrap());
    assert!(verify_proof(&pvk, &proof, &wrong[..1]).is_err());
}

#[test]
fn test_explicit_and_lazy_systems_both_prove() {
    let mut rng = XorShiftRng::from_seed(SEED);
    let hints = HintRegistry::with_defaults();
    let inputs = transfer_inputs(8, 0);
    for cs in [transfer_circuit(8), lazy_transfer_circuit(8)] {
        let (pk, vk) = generate_parameters::<Bls12, _>(&cs, &mut rng).unwrap();
        let proof = create_random_proof(&cs, &hints, &inputs, &pk, &mut rng).unwrap();
        let pvk = prepare_verifying_key(&vk);
        assert!(verify_proof(&pvk, &proof, &public_inputs(&inputs)).unwrap());
    }
}

#[test]
fn test_fold_order_does_not_change_proof() {
    let cs = lazy_transfer_circuit(6);
    let (pk, vk) = generate_parameters_with::<Bls12>(&cs, &trapdoor()).unwrap();
    let hints = HintRegistry::with_defaults();
    let inputs = transfer_inputs(6, 5);
    let (r, s) = (Fr::from(101u64), Fr::from(202u64));

    let roll = |order: &[KeyPart]| {
        let solution = solve(&cs, &inputs, &hints).unwrap();
        let mut prover = RollProver::new(pk.meta.clone(), solution, r, s).unwrap();
        for part in order {
            prover.fold(&pk, *part).unwrap();
        }
        prover.finish().unwrap()
    };
    let forward = roll(&FOLD_PARTS);
    let mut reversed_order = FOLD_PARTS;
    reversed_order.reverse();
    let reversed = roll(&reversed_order);
    assert_eq!(forward, reversed);

    // B2 already resident, the rest from the store
    let dir = tempfile::tempdir().unwrap();
    let store = SegmentStore::create(dir.path()).unwrap();
    save_proving_key(&store, "s2", &pk, Encoding::Compressed).unwrap();
    let source = StoreKeySource::new(store, "s2", DecodePolicy::Checked);
    let solution = solve(&cs, &inputs, &hints).unwrap();
    let meta = KeySource::<Bls12>::meta(&source).unwrap();
    let mut prover = RollProver::new(meta, solution, r, s).unwrap();
    prover.fold_b2(&pk.b_g2).unwrap();
    for part in [KeyPart::Z, KeyPart::K, KeyPart::A, KeyPart::B1] {
        prover.fold(&source, part).unwrap();
    }
    let mixed = prover.finish().unwrap();
    assert_eq!(mixed, forward);
    assert!(verify_proof(&prepare_verifying_key(&vk), &forward, &public_inputs(&inputs)).unwrap());
}

#[test]
fn test_dumped_key_matches_in_memory_key() {
    let cs = lazy_transfer_circuit(5);
    let (pk, vk) = generate_parameters::<Bls12, _>(&cs, &mut XorShiftRng::from_seed(SEED)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = SegmentStore::create(dir.path()).unwrap();
    let mut rng = XorShiftRng::from_seed(SEED);
    let dumped_vk =
        setup_with_dump::<Bls12, _>(&cs, &store, "s3", Encoding::Raw, &mut rng).unwrap();
    assert_eq!(dumped_vk, vk);
    assert_eq!(load_proving_key::<Bls12>(&store, "s3", DecodePolicy::Unchecked).unwrap(), pk);
    assert_eq!(load_proving_key::<Bls12>(&store, "s3", DecodePolicy::Checked).unwrap(), pk);

    save_proving_key(&store, "s4", &pk, Encoding::Compressed).unwrap();
    assert_eq!(load_proving_key::<Bls12>(&store, "s4", DecodePolicy::Checked).unwrap(), pk);
    let size = |session| store.size(&KeyPart::A.segment(session)).unwrap();
    assert!(size("s4") < size("s3"));
}

#[test]
fn test_meta_segment_reads_alone() {
    let cs = lazy_transfer_circuit(4);
    let (pk, _) = generate_parameters_with::<Bls12>(&cs, &trapdoor()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = SegmentStore::create(dir.path()).unwrap();
    save_proving_key(&store, "s5", &pk, Encoding::Raw).unwrap();
    for part in FOLD_PARTS {
        store.remove(&part.segment("s5")).unwrap();
    }

    let source = StoreKeySource::new(store, "s5", DecodePolicy::Checked);
    let meta = KeySource::<Bls12>::meta(&source).unwrap();
    assert_eq!(meta, pk.meta);
    assert_eq!(meta.nb_constraints, cs.nb_constraints());
    assert_eq!(meta.expected_len(KeyPart::Z), meta.domain_size as usize - 1);
}

#[test]
fn test_missing_segment_aborts_without_proof() {
    let cs = lazy_transfer_circuit(4);
    let (pk, _) = generate_parameters_with::<Bls12>(&cs, &trapdoor()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = SegmentStore::create(dir.path()).unwrap();
    save_proving_key(&store, "s6", &pk, Encoding::Compressed).unwrap();
    store.remove(&KeyPart::K.segment("s6")).unwrap();

    let hints = HintRegistry::with_defaults();
    let inputs = transfer_inputs(4, 1);
    let source = StoreKeySource::new(store.clone(), "s6", DecodePolicy::Checked);
    let solution = solve(&cs, &inputs, &hints).unwrap();
    let mut prover = RollProver::new(pk.meta.clone(), solution, Fr::ONE, Fr::ONE).unwrap();
    prover.fold(&source, KeyPart::A).unwrap();
    match prover.fold(&source, KeyPart::K) {
        Err(ProverError::Codec(CodecError::Io { segment, .. })) => {
            assert_eq!(segment, "pk.K.s6.save")
        }
        other => panic!("expected io fault, got {other:?}"),
    }
    assert_eq!(prover.pending(), vec![KeyPart::B1, KeyPart::B2, KeyPart::K, KeyPart::Z]);
    match prover.finish() {
        Err(ProverError::Incomplete(parts)) => assert_eq!(parts.len(), 4),
        other => panic!("expected incomplete, got {other:?}"),
    }

    let mut rng = XorShiftRng::from_seed(SEED);
    let err =
        create_random_proof::<Bls12, _, _>(&cs, &hints, &inputs, &source, &mut rng).unwrap_err();
    assert!(matches!(err, ProverError::Codec(_)));
    assert!(!store.exists("proof.s6.save"));
}

#[test]
fn test_bad_folds_rejected() {
    let cs = lazy_transfer_circuit(3);
    let (pk, _) = generate_parameters_with::<Bls12>(&cs, &trapdoor()).unwrap();
    let hints = HintRegistry::with_defaults();
    let inputs = transfer_inputs(3, 2);

    let solution = solve(&cs, &inputs, &hints).unwrap();
    let mut prover = RollProver::new(pk.meta.clone(), solution.clone(), Fr::ONE, Fr::ONE).unwrap();
    assert!(matches!(
        prover.fold_g1(KeyPart::A, &pk.a[1..]),
        Err(ProverError::SegmentLength { expected, got, .. })
            if expected == pk.a.len() && got == pk.a.len() - 1
    ));
    prover.fold(&pk, KeyPart::Z).unwrap();
    assert!(matches!(prover.fold(&pk, KeyPart::Z), Err(ProverError::AlreadyFolded(KeyPart::Z))));
    assert!(matches!(prover.fold(&pk, KeyPart::E), Err(ProverError::WrongGroup(KeyPart::E))));

    let mut subverted = pk.meta.clone();
    subverted.delta_g1 = blstrs::G1Affine::identity();
    assert!(matches!(
        RollProver::<Bls12>::new(subverted, solution, Fr::ONE, Fr::ONE),
        Err(ProverError::UnexpectedIdentity)
    ));

    let mut rng = XorShiftRng::from_seed(SEED);
    let err = create_random_proof(&cs, &hints, &inputs[1..], &pk, &mut rng).unwrap_err();
    assert!(matches!(err, ProverError::Solver(SolverError::WitnessLength { .. })));
}

#[test]
fn test_failed_setup_leaves_no_segments() {
    let cs = lazy_transfer_circuit(4);
    let (pk, vk) = generate_parameters_with::<Bls12>(&cs, &trapdoor()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = SegmentStore::create(dir.path()).unwrap();

    // key from an earlier run, then a directory where K must land
    save_proving_key(&store, "s7", &pk, Encoding::Raw).unwrap();
    save_verifying_key(&store, "s7", &vk, Encoding::Raw).unwrap();
    let k = KeyPart::K.segment("s7");
    store.remove(&k).unwrap();
    std::fs::create_dir(store.path(&k)).unwrap();
    std::fs::write(store.path(&k).join("stale"), b"x").unwrap();

    let mut rng = XorShiftRng::from_seed(SEED);
    let err = setup_with_dump::<Bls12, _>(&cs, &store, "s7", Encoding::Compressed, &mut rng)
        .unwrap_err();
    match err {
        SetupError::Codec(CodecError::Io { segment, .. }) => assert_eq!(segment, k),
        other => panic!("expected io fault, got {other:?}"),
    }
    for part in [KeyPart::E].into_iter().chain(FOLD_PARTS) {
        assert!(!store.exists(&part.segment("s7")), "{part} left behind");
    }
    assert!(!store.exists("vk.s7.save"));
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(leftovers, vec![k]);
}
