//! Synthetic batched-transfer circuit used by the pipeline and the bench.
//!
//! Public inputs are `[total, fee, fee_pool]`. A shared `gas = fee²` wire is
//! solved once before the batch. Each transfer then takes four secret inputs
//! `(amount, before, after, weighted)` and enforces
//!
//! ```text
//! (before - amount - fee) * 1   = after
//! before                  * gas = weighted
//! ```
//!
//! After the batch, `Σ amount = total`, and `fee * n = fee_pool` binds the
//! fee pool.

use anyhow::Context;
use blstrs::Scalar as Fr;
use rollzk_cs::{
    CircuitBuilder, ConstraintSystem, TemplateFactory, TemplateKey, TemplateRegistry, Wire,
};

pub const TRANSFER_TEMPLATE: &str = "transfer";
const SECRETS_PER_TRANSFER: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferBatch {
    pub transfers: usize,
    pub fee: u64,
}

impl TransferBatch {
    pub fn new(transfers: usize, fee: u64) -> Self {
        Self { transfers, fee }
    }

    pub fn template_key() -> TemplateKey {
        TemplateKey::new(TRANSFER_TEMPLATE, &[SECRETS_PER_TRANSFER])
    }

    pub fn registry() -> anyhow::Result<TemplateRegistry> {
        let mut registry = TemplateRegistry::new();
        registry
            .register(TemplateFactory::new(Self::template_key()))
            .context("failed to register transfer template")?;
        Ok(registry)
    }

    /// Compile the constraint system for this batch size.
    pub fn build(&self) -> anyhow::Result<ConstraintSystem<Fr>> {
        let registry = Self::registry()?;
        let n = i64::try_from(self.transfers).context("batch too large")?;

        let mut b = CircuitBuilder::<Fr>::new();
        let total = b.public_input();
        let fee = b.public_input();
        let fee_pool = b.public_input();

        let gas = b.internal();
        b.mark_shared(gas);
        b.enforce_terms(&[(fee, 1)], &[(fee, 1)], &[(gas, 1)])?;

        let mut amounts = Vec::with_capacity(self.transfers);
        b.begin_block(&registry, &Self::template_key())?;
        for _ in 0..self.transfers {
            let amount = b.secret_input();
            let before = b.secret_input();
            let after = b.secret_input();
            let weighted = b.secret_input();
            b.enforce_terms(
                &[(before, 1), (amount, -1), (fee, -1)],
                &[(Wire::ONE, 1)],
                &[(after, 1)],
            )?;
            b.enforce_terms(&[(before, 1)], &[(gas, 1)], &[(weighted, 1)])?;
            amounts.push((amount, 1));
        }
        b.end_block();

        b.enforce_terms(&amounts, &[(Wire::ONE, 1)], &[(total, 1)])?;
        b.enforce_terms(&[(fee, 1)], &[(Wire::ONE, n)], &[(fee_pool, 1)])?;
        Ok(b.build())
    }

    /// Public then secret inputs for a batch where transfer `i` moves
    /// `i + 1` out of a balance of `1000 + i`.
    pub fn inputs(&self) -> Vec<Fr> {
        let gas = Fr::from(self.fee) * Fr::from(self.fee);
        let amounts: Vec<u64> = (1..=self.transfers as u64).collect();

        let mut inputs = Vec::with_capacity(3 + self.transfers * SECRETS_PER_TRANSFER as usize);
        inputs.push(Fr::from(amounts.iter().sum::<u64>()));
        inputs.push(Fr::from(self.fee));
        inputs.push(Fr::from(self.fee) * Fr::from(self.transfers as u64));
        for (i, amount) in amounts.into_iter().enumerate() {
            let before = Fr::from(1000 + i as u64);
            let amount = Fr::from(amount);
            inputs.push(amount);
            inputs.push(before);
            inputs.push(before - amount - Fr::from(self.fee));
            inputs.push(before * gas);
        }
        inputs
    }

    pub fn nb_public(&self) -> usize {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollzk_cs::{lazify, solve, HintRegistry, LazifyConfig};

    #[test]
    fn test_batch_solves_before_and_after_lazify() {
        let batch = TransferBatch::new(16, 3);
        let mut cs = batch.build().unwrap();
        assert_eq!(cs.nb_constraints(), 1 + 2 * 16 + 2);
        assert_eq!(cs.nb_public(), 3);

        let hints = HintRegistry::with_defaults();
        let explicit = solve(&cs, &batch.inputs(), &hints).unwrap();
        assert!(explicit.is_satisfied(&cs));

        let report = lazify(&mut cs, &LazifyConfig::default());
        assert_eq!(report.templates_added, 2);
        assert_eq!(cs.nb_explicit(), 3);
        assert!(cs.templates().iter().all(|t| t.count == 16 && t.stride == 4));

        let lazy = solve(&cs, &batch.inputs(), &hints).unwrap();
        assert!(lazy.is_satisfied(&cs));
        assert_eq!(lazy.values, explicit.values);
    }

    #[test]
    fn test_wrong_fee_pool_is_unsatisfied() {
        let batch = TransferBatch::new(4, 2);
        let cs = batch.build().unwrap();
        let mut inputs = batch.inputs();
        inputs[2] += Fr::from(1u64);
        assert!(solve(&cs, &inputs, &HintRegistry::with_defaults()).is_err());
    }
}
