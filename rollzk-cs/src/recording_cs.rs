//! bellpepper front end.
//!
//! [`RecordingCS`] runs a bellpepper [`Circuit`] and captures its R1CS
//! structure as a [`ConstraintSystem`](crate::ConstraintSystem). bellpepper
//! inputs become public wires (input 0 is the constant one) and auxiliary
//! variables become secret wires. Every auxiliary value is supplied by the
//! witness, so all constraints land in level 0 and the solver only checks
//! and expands them.
//!
//! [`WitnessCS`] runs the same circuit and keeps only the assignment, laid
//! out in the same wire order.

use bellpepper_core::{
    Circuit, ConstraintSystem, Index, LinearCombination, SynthesisError, Variable,
};
use ff::PrimeField;
use tracing::info;

use crate::coeff::CoeffTable;
use crate::csr::{ConstraintMatrices, Term};
use crate::system::{self, Level, WirePartition};

/// Bit flag distinguishing aux columns from input columns while recording.
/// Inputs and constraints are interleaved during synthesis, so the final
/// number of inputs is only known in [`RecordingCS::into_system`].
const AUX_FLAG: u32 = 0x8000_0000;

/// A bellpepper `ConstraintSystem` that records structure into CSR form.
///
/// ```ignore
/// let mut cs = RecordingCS::<Fr>::new();
/// cs.alloc_input(|| "one", || Ok(Fr::ONE))?;
/// circuit.synthesize(&mut cs)?;
/// let system = cs.into_system();
/// ```
pub struct RecordingCS<Scalar: PrimeField> {
    num_inputs: usize,
    num_aux: usize,
    coeffs: CoeffTable<Scalar>,
    rows: ConstraintMatrices,
}

impl<Scalar: PrimeField> RecordingCS<Scalar> {
    fn new_empty() -> Self {
        Self {
            num_inputs: 0,
            num_aux: 0,
            coeffs: CoeffTable::new(),
            rows: ConstraintMatrices::default(),
        }
    }

    fn record(&mut self, lc: &LinearCombination<Scalar>) -> Vec<Term> {
        let mut terms = Vec::new();
        for (index, coeff) in lc.iter_inputs() {
            if !bool::from(coeff.is_zero()) {
                terms.push(Term::new(*index as u32, self.coeffs.intern(coeff)));
            }
        }
        for (index, coeff) in lc.iter_aux() {
            if !bool::from(coeff.is_zero()) {
                terms.push(Term::new(*index as u32 | AUX_FLAG, self.coeffs.intern(coeff)));
            }
        }
        terms
    }

    /// Finalize into a constraint system (no templates yet; see
    /// [`crate::lazify`]).
    pub fn into_system(mut self) -> system::ConstraintSystem<Scalar> {
        let wires = WirePartition {
            nb_public: self.num_inputs.saturating_sub(1) as u32,
            nb_secret: self.num_aux as u32,
            nb_internal: 0,
        };
        let first_secret = wires.first_secret();
        for m in self.rows.sides_mut() {
            m.remap_wires(|col| {
                if col & AUX_FLAG != 0 {
                    first_secret + (col & !AUX_FLAG)
                } else {
                    col
                }
            });
        }
        let nb_rows = self.rows.num_rows();

        info!(
            num_inputs = self.num_inputs,
            num_aux = self.num_aux,
            num_constraints = nb_rows,
            l_nnz = self.rows.l.nnz(),
            r_nnz = self.rows.r.nnz(),
            o_nnz = self.rows.o.nnz(),
            coeffs = self.coeffs.len(),
            "RecordingCS: extracted constraint system"
        );

        let mut cs = system::ConstraintSystem::empty(wires, self.coeffs);
        cs.explicit = self.rows;
        cs.block_tags = vec![0; nb_rows];
        if nb_rows > 0 {
            cs.levels = vec![Level {
                constraints: (0..nb_rows as u32).collect(),
                ..Level::default()
            }];
        }
        cs
    }
}

impl<Scalar: PrimeField> ConstraintSystem<Scalar> for RecordingCS<Scalar> {
    type Root = Self;

    fn new() -> Self {
        Self::new_empty()
    }

    fn alloc<F, A, AR>(&mut self, _: A, f: F) -> Result<Variable, SynthesisError>
    where
        F: FnOnce() -> Result<Scalar, SynthesisError>,
        A: FnOnce() -> AR,
        AR: Into<String>,
    {
        // Some circuits branch on earlier values, so the closure still runs.
        let _val = f()?;
        let index = self.num_aux;
        self.num_aux += 1;
        Ok(Variable(Index::Aux(index)))
    }

    fn alloc_input<F, A, AR>(&mut self, _: A, f: F) -> Result<Variable, SynthesisError>
    where
        F: FnOnce() -> Result<Scalar, SynthesisError>,
        A: FnOnce() -> AR,
        AR: Into<String>,
    {
        let _val = f()?;
        let index = self.num_inputs;
        self.num_inputs += 1;
        Ok(Variable(Index::Input(index)))
    }

    fn enforce<A, AR, LA, LB, LC>(&mut self, _: A, a: LA, b: LB, c: LC)
    where
        A: FnOnce() -> AR,
        AR: Into<String>,
        LA: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
        LB: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
        LC: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
    {
        let l = self.record(&a(LinearCombination::zero()));
        let r = self.record(&b(LinearCombination::zero()));
        let o = self.record(&c(LinearCombination::zero()));
        self.rows.l.push_row(&l);
        self.rows.r.push_row(&r);
        self.rows.o.push_row(&o);
    }

    fn push_namespace<NR, N>(&mut self, _: N)
    where
        NR: Into<String>,
        N: FnOnce() -> NR,
    {
    }

    fn pop_namespace(&mut self) {}

    fn get_root(&mut self) -> &mut Self::Root {
        self
    }
}

/// Collects a circuit's assignment in wire order: `[1, inputs.., aux..]`.
pub struct WitnessCS<Scalar: PrimeField> {
    inputs: Vec<Scalar>,
    aux: Vec<Scalar>,
}

impl<Scalar: PrimeField> WitnessCS<Scalar> {
    /// Full wire assignment, constant first.
    pub fn into_values(self) -> Vec<Scalar> {
        let mut values = self.inputs;
        values.extend(self.aux);
        values
    }

    /// Public then secret values, without the constant: the solver's input.
    pub fn into_inputs(self) -> Vec<Scalar> {
        let mut values = self.into_values();
        if !values.is_empty() {
            values.remove(0);
        }
        values
    }
}

impl<Scalar: PrimeField> ConstraintSystem<Scalar> for WitnessCS<Scalar> {
    type Root = Self;

    fn new() -> Self {
        Self {
            inputs: Vec::new(),
            aux: Vec::new(),
        }
    }

    fn alloc<F, A, AR>(&mut self, _: A, f: F) -> Result<Variable, SynthesisError>
    where
        F: FnOnce() -> Result<Scalar, SynthesisError>,
        A: FnOnce() -> AR,
        AR: Into<String>,
    {
        self.aux.push(f()?);
        Ok(Variable(Index::Aux(self.aux.len() - 1)))
    }

    fn alloc_input<F, A, AR>(&mut self, _: A, f: F) -> Result<Variable, SynthesisError>
    where
        F: FnOnce() -> Result<Scalar, SynthesisError>,
        A: FnOnce() -> AR,
        AR: Into<String>,
    {
        self.inputs.push(f()?);
        Ok(Variable(Index::Input(self.inputs.len() - 1)))
    }

    fn enforce<A, AR, LA, LB, LC>(&mut self, _: A, _: LA, _: LB, _: LC)
    where
        A: FnOnce() -> AR,
        AR: Into<String>,
        LA: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
        LB: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
        LC: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
    {
    }

    fn push_namespace<NR, N>(&mut self, _: N)
    where
        NR: Into<String>,
        N: FnOnce() -> NR,
    {
    }

    fn pop_namespace(&mut self) {}

    fn get_root(&mut self) -> &mut Self::Root {
        self
    }
}

/// Record the structure of `circuit`.
///
/// The circuit may carry any witness values; only its constraints are kept.
pub fn extract_system<Scalar, C>(
    circuit: C,
) -> Result<system::ConstraintSystem<Scalar>, SynthesisError>
where
    Scalar: PrimeField,
    C: Circuit<Scalar>,
{
    let mut cs = RecordingCS::<Scalar>::new();
    cs.alloc_input(|| "one", || Ok(Scalar::ONE))?;
    circuit.synthesize(&mut cs)?;
    Ok(cs.into_system())
}

/// Synthesize `circuit` and return the solver input (public then secret values).
pub fn extract_inputs<Scalar, C>(circuit: C) -> Result<Vec<Scalar>, SynthesisError>
where
    Scalar: PrimeField,
    C: Circuit<Scalar>,
{
    let mut cs = WitnessCS::<Scalar>::new();
    cs.alloc_input(|| "one", || Ok(Scalar::ONE))?;
    circuit.synthesize(&mut cs)?;
    Ok(cs.into_inputs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lazy::{lazify, LazifyConfig};
    use crate::registry::HintRegistry;
    use crate::solver::solve;
    use blstrs::Scalar as Fr;

    /// `n` copies of `x_i^3 + x_i + 5 = y_i` with `y_i` public.
    struct Cubes {
        xs: Vec<Option<Fr>>,
    }

    impl Circuit<Fr> for Cubes {
        fn synthesize<CS: ConstraintSystem<Fr>>(self, cs: &mut CS) -> Result<(), SynthesisError> {
            let mut outs = Vec::new();
            for x in &self.xs {
                let y = x.map(|x| x * x * x + x + Fr::from(5u64));
                outs.push(cs.alloc_input(|| "y", || y.ok_or(SynthesisError::AssignmentMissing))?);
            }
            for (i, x_val) in self.xs.iter().enumerate() {
                let x = cs.alloc(|| "x", || x_val.ok_or(SynthesisError::AssignmentMissing))?;
                let x2_val = x_val.map(|x| x * x);
                let x2 = cs.alloc(|| "x2", || x2_val.ok_or(SynthesisError::AssignmentMissing))?;
                cs.enforce(|| "x2", |lc| lc + x, |lc| lc + x, |lc| lc + x2);
                let x3_val = x2_val.zip(*x_val).map(|(a, b)| a * b);
                let x3 = cs.alloc(|| "x3", || x3_val.ok_or(SynthesisError::AssignmentMissing))?;
                cs.enforce(|| "x3", |lc| lc + x2, |lc| lc + x, |lc| lc + x3);
                cs.enforce(
                    || "y",
                    |lc| lc + x3 + x + (Fr::from(5u64), CS::one()),
                    |lc| lc + CS::one(),
                    |lc| lc + outs[i],
                );
            }
            Ok(())
        }
    }

    fn cubes(n: usize) -> Cubes {
        Cubes {
            xs: (0..n).map(|i| Some(Fr::from(i as u64 + 2))).collect(),
        }
    }

    #[test]
    fn test_recording_layout() {
        let cs = extract_system(cubes(3)).unwrap();
        assert_eq!(cs.nb_public(), 3);
        assert_eq!(cs.nb_secret(), 9);
        assert_eq!(cs.nb_internal(), 0);
        assert_eq!(cs.nb_constraints(), 9);
        assert_eq!(cs.levels().len(), 1);
        // first aux lands right after the public inputs
        let c = cs.fetch(0).unwrap();
        assert_eq!(c.l.terms()[0].wire, 4);
        cs.validate_structure().unwrap();
    }

    #[test]
    fn test_recorded_system_solves_and_lazifies() {
        let mut cs = extract_system(cubes(8)).unwrap();
        let inputs = extract_inputs(cubes(8)).unwrap();
        assert_eq!(inputs.len(), cs.wires().nb_inputs());

        let hints = HintRegistry::with_defaults();
        let before = solve(&cs, &inputs, &hints).unwrap();
        assert!(before.is_satisfied(&cs));

        let report = lazify(&mut cs, &LazifyConfig::default());
        // the output constraints read distinct public wires and stay explicit
        assert_eq!(report.templates_added, 2);
        assert_eq!(cs.nb_explicit(), 8);

        let after = solve(&cs, &inputs, &hints).unwrap();
        for old in 0..24 {
            let new = report.new_position(old) as usize;
            assert_eq!(before.a[old], after.a[new]);
            assert_eq!(before.b[old], after.b[new]);
            assert_eq!(before.c[old], after.c[new]);
        }
    }
}
