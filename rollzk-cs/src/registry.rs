//! Hint and template-factory registries.
//!
//! Hints compute wires that no single constraint determines (bit
//! decompositions, inverses, is-zero flags). They are referenced from a
//! system by string key and resolved against a [`HintRegistry`] at solve time.
//!
//! Template factories describe reusable gadget families. Constraints emitted
//! inside a factory block carry the block's tag, which becomes part of their
//! structural signature; a factory may also opt its constraints out of
//! template extraction altogether.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ff::PrimeField;
use serde::{Deserialize, Serialize};

use crate::error::CsError;

/// Hint function: fills `outputs` from `inputs`.
pub type HintFn<F> = Arc<dyn Fn(&[F], &mut [F]) -> Result<(), String> + Send + Sync>;

/// Key of the built-in is-zero hint.
pub const IS_ZERO: &str = "is_zero";

/// Key of the built-in inverse hint (`0` maps to `0`).
pub const INVERSE: &str = "inverse";

/// `outputs[0] = 1` when `inputs[0] == 0`, else `0`.
pub fn is_zero<F: PrimeField>(inputs: &[F], outputs: &mut [F]) -> Result<(), String> {
    let (Some(x), Some(out)) = (inputs.first(), outputs.first_mut()) else {
        return Err("is_zero takes one input and one output".into());
    };
    *out = if bool::from(x.is_zero()) {
        F::ONE
    } else {
        F::ZERO
    };
    Ok(())
}

/// `outputs[0] = 1 / inputs[0]`, or `0` for a zero input.
pub fn inverse<F: PrimeField>(inputs: &[F], outputs: &mut [F]) -> Result<(), String> {
    let (Some(x), Some(out)) = (inputs.first(), outputs.first_mut()) else {
        return Err("inverse takes one input and one output".into());
    };
    *out = Option::from(x.invert()).unwrap_or(F::ZERO);
    Ok(())
}

/// Hint functions by key.
pub struct HintRegistry<F: PrimeField> {
    hints: HashMap<String, HintFn<F>>,
}

impl<F: PrimeField> Default for HintRegistry<F> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<F: PrimeField> HintRegistry<F> {
    pub fn empty() -> Self {
        Self {
            hints: HashMap::new(),
        }
    }

    /// Registry holding the built-in hints.
    pub fn with_defaults() -> Self {
        let mut r = Self::empty();
        r.register(IS_ZERO, is_zero::<F>);
        r.register(INVERSE, inverse::<F>);
        r
    }

    /// Register `f` under `key`, replacing any previous entry.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        f: impl Fn(&[F], &mut [F]) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.hints.insert(key.into(), Arc::new(f));
    }

    pub fn get(&self, key: &str) -> Option<&HintFn<F>> {
        self.hints.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.hints.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }
}

/// Deterministic key of a template factory: family name plus parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateKey(String);

impl TemplateKey {
    pub fn new(family: &str, params: &[u64]) -> Self {
        let mut key = family.to_string();
        for p in params {
            key.push('-');
            key.push_str(&p.to_string());
        }
        Self(key)
    }

    /// Key of the Poseidon permutation gadget over `width` field elements.
    pub fn poseidon(width: u32) -> Self {
        Self(format!("poseidon-params-{width}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered gadget family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateFactory {
    pub key: TemplateKey,
    /// Whether constraints emitted in this family's blocks may become templates.
    pub lazy: bool,
}

impl TemplateFactory {
    pub fn new(key: TemplateKey) -> Self {
        Self { key, lazy: true }
    }

    /// Keep this family's constraints explicit.
    pub fn eager(mut self) -> Self {
        self.lazy = false;
        self
    }
}

/// Factories by key.
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    factories: BTreeMap<TemplateKey, TemplateFactory>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Poseidon families for widths `1..=17`.
    pub fn with_poseidon() -> Self {
        let mut r = Self::new();
        for width in 1..=17 {
            r.factories.insert(
                TemplateKey::poseidon(width),
                TemplateFactory::new(TemplateKey::poseidon(width)),
            );
        }
        r
    }

    pub fn register(&mut self, factory: TemplateFactory) -> Result<(), CsError> {
        if self.factories.contains_key(&factory.key) {
            return Err(CsError::DuplicateTemplate(factory.key.0));
        }
        self.factories.insert(factory.key.clone(), factory);
        Ok(())
    }

    pub fn get(&self, key: &TemplateKey) -> Option<&TemplateFactory> {
        self.factories.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &TemplateKey> {
        self.factories.keys()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// A factory block as recorded in a constraint system. Tag `t` refers to
/// `blocks[t - 1]`; tag 0 means "outside any block".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub key: String,
    pub lazy: bool,
}
