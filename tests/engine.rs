//! End-to-end differentiation over small scalar graphs.

use std::cell::Cell;
use std::rc::Rc;

use pullback::{GradFn1, differentiate, differentiate_with, eval_only, gradient, num, op1};

#[test]
fn square_and_its_derivative() {
    let (value, grads) = differentiate(vec![3.0_f64], |g, xs| {
        g.apply(num::square(), &[xs[0].clone()])
    });
    assert_eq!(value, 9.0);
    assert_eq!(grads, vec![6.0]);
}

#[test]
fn fan_out_accumulates_both_paths() {
    // f(x) = x² + x², so f'(x) = 4x.
    let (value, grads) = differentiate(vec![3.0_f64], |g, xs| {
        let sq = g.apply(num::square(), &[xs[0].clone()]);
        g.apply(num::add(), &[sq.clone(), sq])
    });
    assert_eq!(value, 18.0);
    assert_eq!(grads, vec![12.0]);
}

#[test]
fn diamond_graph() {
    // f(x, y) = (x + y)(x − y) = x² − y².
    let (value, grads) = differentiate(vec![3.0_f64, 2.0], |g, xs| {
        let sum = g.apply(num::add(), &[xs[0].clone(), xs[1].clone()]);
        let diff = g.apply(num::sub(), &[xs[0].clone(), xs[1].clone()]);
        g.apply(num::mul(), &[sum, diff])
    });
    assert_eq!(value, 5.0);
    assert_eq!(grads, vec![6.0, -4.0]);
}

#[test]
fn constants_scale_but_take_no_gradient() {
    let (value, grads) = differentiate(vec![3.0_f64], |g, xs| {
        let five = g.constant(5.0);
        g.apply(num::mul(), &[xs[0].clone(), five])
    });
    assert_eq!(value, 15.0);
    assert_eq!(grads, vec![5.0]);
}

#[test]
fn unused_input_gets_a_zero_gradient() {
    let (value, grads) = differentiate(vec![3.0_f64, 7.0], |g, xs| {
        g.apply(num::square(), &[xs[0].clone()])
    });
    assert_eq!(value, 9.0);
    assert_eq!(grads, vec![6.0, 0.0]);
}

#[test]
fn identity_computation() {
    let (value, grads) = differentiate(vec![3.0_f64], |_, xs| xs[0].clone());
    assert_eq!(value, 3.0);
    assert_eq!(grads, vec![1.0]);
}

#[test]
fn constant_output_detaches_every_input() {
    let (value, grads) = differentiate(vec![3.0_f64, 4.0], |g, _| g.constant(7.0));
    assert_eq!(value, 7.0);
    assert_eq!(grads, vec![0.0, 0.0]);
}

#[test]
fn explicit_seed_scales_the_gradients() {
    let (_, grads) = differentiate_with(vec![3.0_f64], 2.0, |g, xs| {
        g.apply(num::square(), &[xs[0].clone()])
    });
    assert_eq!(grads, vec![12.0]);

    let (_, grads) = differentiate_with(vec![3.0_f64], 5.0, |_, xs| xs[0].clone());
    assert_eq!(grads, vec![5.0]);
}

#[test]
fn eval_only_matches_differentiate() {
    let value = eval_only(vec![3.0_f64, 4.0], |g, xs| {
        let sum = g.apply(num::add(), &[xs[0].clone(), xs[1].clone()]);
        g.apply(num::square(), &[sum])
    });
    let (checked, _) = differentiate(vec![3.0_f64, 4.0], |g, xs| {
        let sum = g.apply(num::add(), &[xs[0].clone(), xs[1].clone()]);
        g.apply(num::square(), &[sum])
    });
    assert_eq!(value, checked);
    assert_eq!(value, 49.0);
}

#[test]
fn gradient_only_entry_point() {
    let grads = gradient(vec![2.0_f64], |g, xs| {
        g.apply(num::square(), &[xs[0].clone()])
    });
    assert_eq!(grads, vec![4.0]);
}

#[test]
fn bound_references_still_share_one_node() {
    let (value, grads) = differentiate(vec![2.0_f64], |g, xs| {
        let sq = g.apply(num::square(), &[xs[0].clone()]);
        let pinned = g.bind(&sq);
        g.apply(num::add(), &[pinned.clone(), pinned])
    });
    assert_eq!(value, 8.0);
    assert_eq!(grads, vec![8.0]);
}

#[test]
fn repeated_use_accumulates_linearly() {
    // f(x) = x + x + x.
    let (value, grads) = differentiate(vec![4.0_f64], |g, xs| {
        let twice = g.apply(num::add(), &[xs[0].clone(), xs[0].clone()]);
        g.apply(num::add(), &[twice, xs[0].clone()])
    });
    assert_eq!(value, 12.0);
    assert_eq!(grads, vec![3.0]);
}

#[test]
fn integer_values_differentiate_too() {
    let (value, grads) = differentiate(vec![3_i64, 4], |g, xs| {
        g.apply(num::mul(), &[xs[0].clone(), xs[1].clone()])
    });
    assert_eq!(value, 12);
    assert_eq!(grads, vec![4, 3]);
}

#[test]
fn shared_node_runs_forward_and_backward_once() {
    let forward_calls = Rc::new(Cell::new(0_usize));
    let backward_calls = Rc::new(Cell::new(0_usize));

    let fwd = Rc::clone(&forward_calls);
    let bwd = Rc::clone(&backward_calls);
    let counted_square = op1(move |x: &f64| {
        fwd.set(fwd.get() + 1);
        let x = *x;
        let bwd = Rc::clone(&bwd);
        (
            x * x,
            Box::new(move |up: Option<&f64>| {
                bwd.set(bwd.get() + 1);
                up.copied().unwrap_or(1.0) * 2.0 * x
            }) as GradFn1<f64>,
        )
    })
    .named("counted_square");

    // The square feeds three consumers; the op must still run once each way.
    let (value, grads) = differentiate(vec![2.0_f64], move |g, xs| {
        let sq = g.apply(counted_square, &[xs[0].clone()]);
        let sum = g.apply(num::add(), &[sq.clone(), sq.clone()]);
        g.apply(num::add(), &[sum, sq])
    });
    assert_eq!(value, 12.0);
    assert_eq!(grads, vec![12.0]);
    assert_eq!(forward_calls.get(), 1);
    assert_eq!(backward_calls.get(), 1);
}

#[test]
fn deep_chain() {
    // f(x) = ((x²)²)² = x⁸, f'(x) = 8x⁷.
    let (value, grads) = differentiate(vec![2.0_f64], |g, xs| {
        let mut cur = xs[0].clone();
        for _ in 0..3 {
            cur = g.apply(num::square(), &[cur]);
        }
        cur
    });
    assert_eq!(value, 256.0);
    assert_eq!(grads, vec![8.0 * 128.0]);
}
