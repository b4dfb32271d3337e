//! Session pipeline: compile → lazify → dump → setup → prove → verify.
//!
//! Every stage communicates with the next only through the segment store:
//!
//! 1. **Compile** builds the system, optionally lazifies it and publishes
//!    `cs.save`, `cs.ct.save` and both witness segments.
//! 2. **Setup** reopens `cs.save`, stages each proving-key segment as it is
//!    produced, then `vk.<session>.save`, and publishes them together.
//! 3. **Prove** reopens `cs.save` and `witness_full.save` and rolls the proof
//!    one key segment at a time into `proof.<session>.save`.
//! 4. **Verify** reads only `vk`, `proof` and `witness_pub.save`.
//!
//! All parallel work runs inside the session's rayon pool.

use std::time::Instant;

use anyhow::{ensure, Context, Result};
use blstrs::{Bls12, Scalar as Fr};
use rand_core::RngCore;
use rollzk_cs::store::proof_segment;
use rollzk_cs::{
    lazify, load_system, load_witness, save_system, save_witness, ConstraintSystem, HintRegistry,
    SegmentStore, WitnessVariant,
};
use rollzk_groth16::groth16::{
    create_random_proof, load_proof, load_verifying_key, prepare_verifying_key, save_proof,
    setup_with_dump, verify_proof, StoreKeySource,
};
use tracing::{debug, info, info_span};

use crate::config::Config;
use crate::types::{SessionReport, Stage, StageTimings, SystemStats};

pub struct Session {
    config: Config,
    store: SegmentStore,
    pool: rayon::ThreadPool,
    hints: HintRegistry<Fr>,
    timings: StageTimings,
}

impl Session {
    /// Open the configured store and size the worker pool.
    pub fn open(config: Config) -> Result<Self> {
        let buffer = config.memory.segment_buffer_bytes()?;
        let store = SegmentStore::create(config.store.dir.clone())
            .with_context(|| {
                format!("failed to open segment store {}", config.store.dir.display())
            })?
            .with_buffer_capacity(buffer);
        let pool = config.solver.thread_pool()?;
        info!(
            dir = %config.store.dir.display(),
            session = %config.store.session,
            threads = pool.current_num_threads(),
            segment_buffer = buffer,
            "session opened"
        );
        Ok(Self {
            config,
            store,
            pool,
            hints: HintRegistry::with_defaults(),
            timings: StageTimings::default(),
        })
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn session(&self) -> &str {
        &self.config.store.session
    }

    pub fn hints_mut(&mut self) -> &mut HintRegistry<Fr> {
        &mut self.hints
    }

    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }

    /// Compress `cs` if enabled and publish it along with `inputs`.
    pub fn compile(&mut self, mut cs: ConstraintSystem<Fr>, inputs: &[Fr]) -> Result<SystemStats> {
        let _span = info_span!("compile", session = %self.config.store.session).entered();
        let start = Instant::now();

        if self.config.lazify.enabled {
            let lazify_config = self.config.lazify.to_lazify_config();
            let report = self.pool.install(|| lazify(&mut cs, &lazify_config));
            debug!(
                templates = report.templates_added,
                compressed = report.compressed(),
                "system compressed"
            );
        }
        cs.validate_structure().context("compiled system failed validation")?;

        save_system(&self.store, &cs).context("failed to publish constraint system")?;
        save_witness(&self.store, inputs, cs.nb_public()).context("failed to publish witness")?;

        let stats = stats_of(&cs);
        self.finish_stage(Stage::Compile, start);
        Ok(stats)
    }

    /// Run setup over the published system.
    pub fn setup<R: RngCore + Send>(&mut self, rng: &mut R) -> Result<()> {
        let session = self.config.store.session.clone();
        let _span = info_span!("setup", session = %session).entered();
        let start = Instant::now();

        let cs = self.load_system()?;
        let encoding = self.config.codec.encoding;
        let store = &self.store;
        self.pool
            .install(|| setup_with_dump::<Bls12, _>(&cs, store, &session, encoding, rng))
            .with_context(|| format!("setup failed for session {session}"))?;

        self.finish_stage(Stage::Setup, start);
        Ok(())
    }

    /// Roll a proof from the published system, witness and key segments.
    pub fn prove<R: RngCore + Send>(&mut self, rng: &mut R) -> Result<u64> {
        let session = self.config.store.session.clone();
        let _span = info_span!("prove", session = %session).entered();
        let start = Instant::now();

        let cs = self.load_system()?;
        let inputs: Vec<Fr> =
            load_witness(&self.store, WitnessVariant::Full).context("failed to load witness")?;
        let source = StoreKeySource::new(self.store.clone(), &session, self.config.codec.decode);
        let hints = &self.hints;
        let proof = self
            .pool
            .install(|| create_random_proof::<Bls12, _, _>(&cs, hints, &inputs, &source, rng))
            .with_context(|| format!("proving failed for session {session}"))?;

        save_proof(&self.store, &session, &proof, self.config.codec.encoding)
            .context("failed to publish proof")?;
        let bytes = self.store.size(&proof_segment(&session))?;

        self.finish_stage(Stage::Prove, start);
        Ok(bytes)
    }

    /// Check the published proof against the published public inputs.
    pub fn verify(&mut self) -> Result<bool> {
        let session = self.config.store.session.clone();
        let _span = info_span!("verify", session = %session).entered();
        let start = Instant::now();

        let policy = self.config.codec.decode;
        let vk = load_verifying_key::<Bls12>(&self.store, &session, policy)
            .with_context(|| format!("failed to load verifying key for session {session}"))?;
        let proof = load_proof::<Bls12>(&self.store, &session, policy)
            .with_context(|| format!("failed to load proof for session {session}"))?;
        let public: Vec<Fr> = load_witness(&self.store, WitnessVariant::Public)
            .context("failed to load public witness")?;

        let pvk = prepare_verifying_key(&vk);
        let ok = verify_proof(&pvk, &proof, &public).context("verification rejected its inputs")?;

        self.finish_stage(Stage::Verify, start);
        Ok(ok)
    }

    /// Run every stage in order.
    pub fn run<R: RngCore + Send>(
        &mut self,
        cs: ConstraintSystem<Fr>,
        inputs: &[Fr],
        rng: &mut R,
    ) -> Result<SessionReport> {
        let stats = self.compile(cs, inputs)?;
        self.setup(rng)?;
        let proof_bytes = self.prove(rng)?;
        let verified = self.verify()?;
        ensure!(verified, "proof for session {} did not verify", self.session());

        Ok(SessionReport {
            session: self.session().to_string(),
            stats,
            proof_bytes,
            verified,
            timings: self.timings.clone(),
        })
    }

    fn load_system(&self) -> Result<ConstraintSystem<Fr>> {
        load_system(&self.store).with_context(|| {
            format!(
                "failed to load constraint system from {}",
                self.store.dir().display()
            )
        })
    }

    fn finish_stage(&mut self, stage: Stage, start: Instant) {
        let elapsed = start.elapsed();
        info!(stage = %stage, elapsed_ms = elapsed.as_millis() as u64, "stage complete");
        self.timings.record(stage, elapsed);
    }
}

pub fn stats_of(cs: &ConstraintSystem<Fr>) -> SystemStats {
    SystemStats {
        nb_constraints: cs.nb_constraints(),
        nb_explicit: cs.nb_explicit(),
        nb_templates: cs.nb_templates(),
        nb_wires: cs.nb_wires(),
        nb_public: cs.nb_public(),
        memory_bytes: cs.memory_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::TransferBatch;
    use rand_core::SeedableRng;
    use rand_xorshift::XorShiftRng;
    use rollzk_groth16::groth16::{DecodePolicy, Encoding, KeyPart};

    fn config(dir: &std::path::Path, lazify: bool) -> Config {
        let mut config = Config::default();
        config.store.dir = dir.to_path_buf();
        config.store.session = "t".to_string();
        config.lazify.enabled = lazify;
        config.solver.threads = 2;
        config
    }

    #[test]
    fn test_pipeline_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = XorShiftRng::from_seed([7; 16]);
        let batch = TransferBatch::new(12, 2);

        let mut session = Session::open(config(dir.path(), true)).unwrap();
        let report = session.run(batch.build().unwrap(), &batch.inputs(), &mut rng).unwrap();
        assert!(report.verified);
        assert_eq!(report.stats.nb_templates, 2);
        assert_eq!(report.stats.nb_explicit, 3);
        assert_eq!(report.proof_bytes, 32 + 48 + 96 + 48);
        for part in [KeyPart::E, KeyPart::A, KeyPart::B1, KeyPart::B2, KeyPart::K, KeyPart::Z] {
            assert!(session.store().exists(&part.segment("t")));
        }
        assert!(report.to_string().contains("verified:     true"));
    }

    #[test]
    fn test_unlazified_raw_unchecked_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = XorShiftRng::from_seed([9; 16]);
        let batch = TransferBatch::new(5, 0);

        let mut cfg = config(dir.path(), false);
        cfg.codec.encoding = Encoding::Raw;
        cfg.codec.decode = DecodePolicy::Unchecked;
        let mut session = Session::open(cfg).unwrap();
        let report = session.run(batch.build().unwrap(), &batch.inputs(), &mut rng).unwrap();
        assert_eq!(report.stats.nb_templates, 0);
        assert_eq!(report.stats.nb_constraints, 1 + 2 * 5 + 2);
        assert_eq!(report.proof_bytes, 32 + 96 + 192 + 96);
    }

    #[test]
    fn test_tampered_public_witness_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = XorShiftRng::from_seed([3; 16]);
        let batch = TransferBatch::new(4, 1);

        let mut session = Session::open(config(dir.path(), true)).unwrap();
        session.compile(batch.build().unwrap(), &batch.inputs()).unwrap();
        session.setup(&mut rng).unwrap();
        session.prove(&mut rng).unwrap();

        let mut public = batch.inputs()[..batch.nb_public()].to_vec();
        public[0] += Fr::from(1u64);
        save_witness(session.store(), &public, batch.nb_public() as u32).unwrap();
        assert!(!session.verify().unwrap());
    }

    #[test]
    fn test_prove_without_setup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let batch = TransferBatch::new(3, 1);
        let mut session = Session::open(config(dir.path(), true)).unwrap();
        session.compile(batch.build().unwrap(), &batch.inputs()).unwrap();
        let err = session.prove(&mut XorShiftRng::from_seed([1; 16])).unwrap_err();
        assert!(format!("{err:#}").contains("pk.E.t.save"));
        assert!(!session.store().exists(&proof_segment("t")));
    }
}
