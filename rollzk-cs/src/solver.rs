//! Level-parallel witness solver.
//!
//! Levels run in order. Within a level every hint and every constraint
//! (explicit rows and all occurrences of the level's templates) reads only
//! wires known before the level started, so they are solved in parallel
//! against a snapshot; new wire values are applied once the whole level has
//! finished.
//!
//! A constraint resolves at most one unknown wire:
//!   - unknown on `O`: `x = (l·r − o') / c_x`
//!   - unknown on `L` (or `R` symmetrically): `x = (o / r − l') / c_x`; when
//!     `r = 0` the constraint only holds if `o = 0`, and `x` is pinned to 0.

use std::time::Instant;

use bitvec::prelude::*;
use ff::PrimeField;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::coeff::{mul_by_coeff, CoeffTable};
use crate::csr::Side;
use crate::error::{RowOrigin, SolverError};
use crate::eval::{Row, Solution};
use crate::registry::HintRegistry;
use crate::system::{ConstraintSystem, HintCall};

struct RowOutput<F> {
    pos: u64,
    abc: [F; 3],
    assigned: Option<(u32, F)>,
}

/// Solve `cs` from its public and secret inputs (in wire order, without the
/// constant), producing every wire value and the A, B, C evaluations.
pub fn solve<F: PrimeField>(
    cs: &ConstraintSystem<F>,
    inputs: &[F],
    hints: &HintRegistry<F>,
) -> Result<Solution<F>, SolverError> {
    let expected = cs.wires().nb_inputs();
    if inputs.len() != expected {
        return Err(SolverError::WitnessLength {
            expected,
            got: inputs.len(),
        });
    }

    let start = Instant::now();
    let nb_wires = cs.nb_wires() as usize;
    let first_internal = cs.wires().first_internal() as usize;
    let mut values = vec![F::ZERO; nb_wires];
    values[0] = F::ONE;
    values[1..first_internal].copy_from_slice(inputs);
    let mut solved = bitvec![u64, Lsb0; 0; nb_wires];
    solved[..first_internal].fill(true);

    let n = cs.nb_constraints() as usize;
    let mut a = vec![F::ZERO; n];
    let mut b = vec![F::ZERO; n];
    let mut c = vec![F::ZERO; n];
    let lazy_base = cs.nb_explicit() as u64;
    let coeffs = cs.coeffs();
    let mut written = 0u64;

    for (li, level) in cs.levels().iter().enumerate() {
        let level_start = Instant::now();

        let hint_outputs = level
            .hints
            .par_iter()
            .map(|&h| run_hint(&cs.hints()[h as usize], coeffs, &values, &solved, hints))
            .collect::<Result<Vec<_>, _>>()?;

        let explicit = level.constraints.par_iter().map(|&i| {
            let at = RowOrigin {
                pos: i as u64,
                template: None,
            };
            solve_row(coeffs, Row::Explicit(cs.explicit().row(i as usize)), at, &values, &solved)
        });
        let lazy = level.templates.par_iter().flat_map(|&t| {
            let template = &cs.templates()[t as usize];
            let first = lazy_base + cs.lazy_map().start(t as usize);
            let (values, solved) = (&values, &solved);
            (0..template.count).into_par_iter().map(move |k| {
                let at = RowOrigin {
                    pos: first + k as u64,
                    template: Some(t),
                };
                solve_row(coeffs, Row::Lazy(template, k), at, values, solved)
            })
        });
        let rows = explicit.chain(lazy).collect::<Result<Vec<_>, _>>()?;

        for (w, v) in hint_outputs.into_iter().flatten() {
            values[w as usize] = v;
            solved.set(w as usize, true);
        }
        let nb_rows = rows.len();
        written += nb_rows as u64;
        for out in rows {
            let p = out.pos as usize;
            [a[p], b[p], c[p]] = out.abc;
            if let Some((w, v)) = out.assigned {
                values[w as usize] = v;
                solved.set(w as usize, true);
            }
        }
        debug!(
            level = li,
            rows = nb_rows,
            hints = level.hints.len(),
            elapsed_us = level_start.elapsed().as_micros() as u64,
            "level solved"
        );
    }

    if written != n as u64 {
        return Err(SolverError::RowCount {
            written,
            expected: n as u64,
        });
    }
    if let Some(w) = solved.first_zero() {
        return Err(SolverError::Incomplete { wire: w as u32 });
    }

    info!(
        solve_ms = start.elapsed().as_millis() as u64,
        levels = cs.levels().len(),
        constraints = n,
        wires = nb_wires,
        "witness solved"
    );
    Ok(Solution { values, a, b, c })
}

fn run_hint<F: PrimeField>(
    call: &HintCall,
    coeffs: &CoeffTable<F>,
    values: &[F],
    solved: &BitSlice<u64, Lsb0>,
    hints: &HintRegistry<F>,
) -> Result<Vec<(u32, F)>, SolverError> {
    let f = hints.get(&call.key).ok_or_else(|| SolverError::MissingHint {
        key: call.key.clone(),
    })?;
    let mut inputs = Vec::with_capacity(call.inputs.len());
    for e in &call.inputs {
        let mut acc = F::ZERO;
        for t in e.terms() {
            let w = t.wire as usize;
            if !solved.get(w).map_or(false, |b| *b) {
                return Err(SolverError::Hint {
                    key: call.key.clone(),
                    message: format!("input wire {} is not solved", t.wire),
                });
            }
            acc += mul_by_coeff(coeffs, t.coeff, &values[w]);
        }
        inputs.push(acc);
    }
    let mut outputs = vec![F::ZERO; call.outputs.len()];
    f(&inputs, &mut outputs).map_err(|message| SolverError::Hint {
        key: call.key.clone(),
        message,
    })?;
    Ok(call.outputs.iter().copied().zip(outputs).collect())
}

fn divide<F: PrimeField>(num: F, den: F, at: RowOrigin, wire: u32) -> Result<F, SolverError> {
    Option::<F>::from(den.invert())
        .map(|inv| num * inv)
        .ok_or(SolverError::DivisionByZero { at, wire })
}

fn solve_row<F: PrimeField>(
    coeffs: &CoeffTable<F>,
    row: Row<'_>,
    at: RowOrigin,
    values: &[F],
    solved: &BitSlice<u64, Lsb0>,
) -> Result<RowOutput<F>, SolverError> {
    let mut known = [F::ZERO; 3];
    let mut unknown: Option<(u32, Side)> = None;
    let mut unknown_coeff = F::ZERO;
    let mut fault = None;

    for side in Side::ALL {
        row.for_each(side, |wire, coeff| {
            if fault.is_some() {
                return;
            }
            let w = wire as usize;
            let Some(is_solved) = solved.get(w).map(|b| *b) else {
                fault = Some(SolverError::WireOutOfRange { at, wire });
                return;
            };
            if is_solved {
                known[side.index()] += mul_by_coeff(coeffs, coeff, &values[w]);
                return;
            }
            match unknown {
                None => {
                    unknown = Some((wire, side));
                    unknown_coeff = *coeffs.get(coeff);
                }
                Some((u, s)) if u == wire && s == side => unknown_coeff += coeffs.get(coeff),
                Some(_) => fault = Some(SolverError::Unresolved { at, wire }),
            }
        });
    }
    if let Some(e) = fault {
        return Err(e);
    }

    let [l, r, o] = known;
    let (abc, assigned) = match unknown {
        None => {
            if l * r != o {
                return Err(SolverError::Unsatisfied { at });
            }
            ([l, r, o], None)
        }
        Some((w, Side::O)) => {
            let full = l * r;
            let x = divide(full - o, unknown_coeff, at, w)?;
            ([l, r, full], Some((w, x)))
        }
        Some((w, side)) => {
            // `known_side · other = o` with one unknown on `known_side`
            let (partial, other) = if side == Side::L { (l, r) } else { (r, l) };
            let (full, x) = if bool::from(other.is_zero()) {
                if !bool::from(o.is_zero()) {
                    return Err(SolverError::Unsatisfied { at });
                }
                (partial, F::ZERO)
            } else {
                let full = divide(o, other, at, w)?;
                (full, divide(full - partial, unknown_coeff, at, w)?)
            };
            let abc = if side == Side::L {
                [full, r, o]
            } else {
                [l, full, o]
            };
            (abc, Some((w, x)))
        }
    };
    Ok(RowOutput {
        pos: at.pos,
        abc,
        assigned,
    })
}
