use blstrs::Scalar as Fr;
use rollzk_cs::registry::IS_ZERO;
use rollzk_cs::{
    lazify, CircuitBuilder, ConstraintSystem, LazifyConfig, TemplateFactory, TemplateKey,
    TemplateRegistry, Wire,
};

/// A batch of `n` transfers: each checks `in == out` and `in * in == sq`; the
/// public total is the sum of inputs and the public fee gets an is-zero flag.
pub fn transfer_circuit(n: usize) -> ConstraintSystem<Fr> {
    let mut registry = TemplateRegistry::new();
    let key = TemplateKey::new("transfer", &[3]);
    registry.register(TemplateFactory::new(key.clone())).unwrap();

    let mut b = CircuitBuilder::<Fr>::new();
    let total = b.public_input();
    let fee = b.public_input();

    let mut sum = Vec::new();
    b.begin_block(&registry, &key).unwrap();
    for _ in 0..n {
        let input = b.secret_input();
        let output = b.secret_input();
        let sq = b.secret_input();
        b.enforce_terms(&[(input, 1), (output, -1)], &[(Wire::ONE, 1)], &[]).unwrap();
        b.enforce_terms(&[(input, 1)], &[(input, 1)], &[(sq, 1)]).unwrap();
        sum.push((input, 1));
    }
    b.end_block();

    let fee2 = b.internal();
    b.enforce_terms(&[(fee, 1)], &[(fee, 1)], &[(fee2, 1)]).unwrap();
    let input = b.lc_i64(&[(fee, 1)]);
    let flag = b.hint(IS_ZERO, vec![input], 1).unwrap()[0];
    b.enforce_terms(&[(flag, 1)], &[(fee, 1)], &[]).unwrap();
    b.enforce_terms(&sum, &[(Wire::ONE, 1)], &[(total, 1)]).unwrap();
    b.build()
}

pub fn lazy_transfer_circuit(n: usize) -> ConstraintSystem<Fr> {
    let mut cs = transfer_circuit(n);
    lazify(&mut cs, &LazifyConfig::default());
    cs
}

/// Public inputs then secret inputs for [`transfer_circuit`].
pub fn transfer_inputs(n: usize, fee: u64) -> Vec<Fr> {
    let amounts: Vec<u64> = (1..=n as u64).collect();
    let mut inputs = vec![Fr::from(amounts.iter().sum::<u64>()), Fr::from(fee)];
    for a in amounts {
        inputs.push(Fr::from(a));
        inputs.push(Fr::from(a));
        inputs.push(Fr::from(a * a));
    }
    inputs
}

pub fn public_inputs(inputs: &[Fr]) -> Vec<Fr> {
    inputs[..2].to_vec()
}
