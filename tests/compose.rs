//! Sub-graph composition: nested passes, split and join.

use smallvec::smallvec;

use pullback::{differentiate, join, nested, num, split};

#[test]
fn nested_pass_behaves_like_a_primitive() {
    // h(x) = nested(x²) · x = x³, so h'(x) = 3x².
    let inner = nested(1, |g, xs| g.apply(num::square(), &[xs[0].clone()]));
    let (value, grads) = differentiate(vec![2.0_f64], move |g, xs| {
        let cubed_part = g.apply(inner, &[xs[0].clone()]);
        g.apply(num::mul(), &[cubed_part, xs[0].clone()])
    });
    assert_eq!(value, 8.0);
    assert_eq!(grads, vec![12.0]);
}

#[test]
fn nested_pass_over_several_inputs() {
    let inner = nested(2, |g, xs| {
        g.apply(num::mul(), &[xs[0].clone(), xs[1].clone()])
    })
    .named("product");
    let (value, grads) = differentiate(vec![3.0_f64, 4.0], move |g, xs| {
        g.apply(inner, &[xs[0].clone(), xs[1].clone()])
    });
    assert_eq!(value, 12.0);
    assert_eq!(grads, vec![4.0, 3.0]);
}

#[test]
fn nested_pass_chains_the_outer_gradient() {
    // f(x) = (nested(x²))², so f'(x) = 4x³.
    let inner = nested(1, |g, xs| g.apply(num::square(), &[xs[0].clone()]));
    let (value, grads) = differentiate(vec![2.0_f64], move |g, xs| {
        let sq = g.apply(inner, &[xs[0].clone()]);
        g.apply(num::square(), &[sq])
    });
    assert_eq!(value, 16.0);
    assert_eq!(grads, vec![32.0]);
}

#[test]
fn split_tracks_parts_under_a_tuple_policy() {
    // Values are pairs, accumulated component-wise. The pair (a, b) is
    // split into two tracked halves, each carried in the first component,
    // and the halves are multiplied back together.
    let halves = split(
        2,
        |&(a, b): &(f64, f64)| smallvec![(a, 0.0), (b, 0.0)],
        |grads: &[Option<(f64, f64)>]| {
            let ga = grads[0].clone().unwrap_or((1.0, 1.0)).0;
            let gb = grads[1].clone().unwrap_or((1.0, 1.0)).0;
            (ga, gb)
        },
    );
    let product = pullback::op2(|x: &(f64, f64), y: &(f64, f64)| {
        let (x0, y0) = (x.0, y.0);
        (
            (x0 * y0, 0.0),
            Box::new(move |up: Option<&(f64, f64)>| {
                let g = up.map(|g| g.0).unwrap_or(1.0);
                ((g * y0, 0.0), (g * x0, 0.0))
            }) as pullback::GradFn2<(f64, f64)>,
        )
    });

    let (value, grads) = differentiate(vec![(3.0_f64, 4.0_f64)], move |g, xs| {
        let parts = g.apply_multi(halves, &[xs[0].clone()]);
        g.apply(product, &[parts[0].clone(), parts[1].clone()])
    });
    assert_eq!(value, (12.0, 0.0));
    assert_eq!(grads, vec![(4.0, 3.0)]);
}

#[test]
fn join_scatters_the_gradient_back_onto_parts() {
    // f(a, b) = (a + 2b)², at a = 1, b = 2.
    let pack = join(
        2,
        |xs: &[f64]| xs[0] + 2.0 * xs[1],
        |g: Option<&f64>| {
            let g = g.copied().unwrap_or(1.0);
            smallvec![g, 2.0 * g]
        },
    );
    let (value, grads) = differentiate(vec![1.0_f64, 2.0], move |g, xs| {
        let combined = g.apply(pack, &[xs[0].clone(), xs[1].clone()]);
        g.apply(num::square(), &[combined])
    });
    assert_eq!(value, 25.0);
    assert_eq!(grads, vec![10.0, 20.0]);
}

#[test]
fn unconsumed_split_part_arrives_as_zero() {
    // Only the first half feeds the output; the second half's gradient
    // slot must be an explicit zero, not the identity.
    let halves = split(
        2,
        |&(a, b): &(f64, f64)| smallvec![(a, 0.0), (b, 0.0)],
        |grads: &[Option<(f64, f64)>]| {
            let ga = grads[0].clone().unwrap_or((1.0, 1.0)).0;
            let gb = grads[1].clone().unwrap_or((1.0, 1.0)).0;
            (ga, gb)
        },
    );
    let first_doubled = pullback::op1(|x: &(f64, f64)| {
        let x0 = x.0;
        (
            (x0 + x0, 0.0),
            Box::new(move |up: Option<&(f64, f64)>| {
                let g = up.map(|g| g.0).unwrap_or(1.0);
                (g + g, 0.0)
            }) as pullback::GradFn1<(f64, f64)>,
        )
    });

    let (value, grads) = differentiate(vec![(3.0_f64, 4.0_f64)], move |g, xs| {
        let parts = g.apply_multi(halves, &[xs[0].clone()]);
        g.apply(first_doubled, &[parts[0].clone()])
    });
    assert_eq!(value, (6.0, 0.0));
    assert_eq!(grads, vec![(2.0, 0.0)]);
}
