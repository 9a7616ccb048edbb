use crate::ml::{self, Node, Tensor};
use crate::utills::rand::{get_random_normal, get_random_uniform, seed};

fn dot(t: &Tensor, r: &[f32]) -> f32 {
    t.as_f32_slice().iter().zip(r).map(|(a, b)| a * b).sum()
}

/// Fixed, non-uniform upstream gradient.
fn weights(n: usize) -> Vec<f32> {
    (0..n).map(|i| ((i * 7 % 11) as f32 - 5.0) / 5.0).collect()
}

fn numeric_grad<F: FnMut(&[f32]) -> f32>(mut f: F, x: &[f32], eps: f32) -> Vec<f32> {
    let mut x = x.to_vec();
    (0..x.len())
        .map(|i| {
            let orig = x[i];
            x[i] = orig + eps;
            let fp = f(&x);
            x[i] = orig - eps;
            let fm = f(&x);
            x[i] = orig;
            (fp - fm) / (2.0 * eps)
        })
        .collect()
}

fn assert_close(analytic: &[f32], numeric: &[f32], tol: f32, message: &str) {
    assert_eq!(analytic.len(), numeric.len(), "{}: length differs", message);
    for (i, (a, n)) in analytic.iter().zip(numeric.iter()).enumerate() {
        assert!(
            (a - n).abs() <= tol * (1.0 + n.abs()),
            "{}: grad[{}] analytic={} numeric={}",
            message,
            i,
            a,
            n
        );
    }
}

fn check_input_grad(node: &mut dyn Node, inputs: &[Tensor], which: usize, eps: f32, tol: f32) {
    let out = node.call(inputs.to_vec());
    let r = weights(out.len());
    let grad_out = Tensor::new(r.clone(), out.shape.clone());
    let refs: Vec<&Tensor> = inputs.iter().collect();
    let analytic = node.backward(&grad_out, refs, &out)[which].clone();
    node.clear_grad();

    let numeric = numeric_grad(
        |v| {
            let mut inp = inputs.to_vec();
            inp[which] = Tensor::new(v.to_vec(), inputs[which].shape.clone());
            dot(&node.call(inp), &r)
        },
        inputs[which].as_f32_slice(),
        eps,
    );
    assert_close(
        analytic.as_f32_slice(),
        &numeric,
        tol,
        &format!("input {}", which),
    );
}

fn check_param_grads(node: &mut dyn Node, inputs: &[Tensor], eps: f32, tol: f32) {
    node.clear_grad();
    let out = node.call(inputs.to_vec());
    let r = weights(out.len());
    let grad_out = Tensor::new(r.clone(), out.shape.clone());
    let refs: Vec<&Tensor> = inputs.iter().collect();
    node.backward(&grad_out, refs, &out);
    let analytic: Vec<Vec<f32>> = node
        .pull_grad()
        .expect("parameter gradients after backward")
        .iter()
        .map(|g| g.as_f32_slice().to_vec())
        .collect();
    node.clear_grad();

    for (k, analytic) in analytic.iter().enumerate() {
        let base = node.param_tensors()[k].as_f32_slice().to_vec();
        let numeric = numeric_grad(
            |v| {
                node.param_tensors_mut()[k].f32_data_mut().copy_from_slice(v);
                dot(&node.call(inputs.to_vec()), &r)
            },
            &base,
            eps,
        );
        node.param_tensors_mut()[k]
            .f32_data_mut()
            .copy_from_slice(&base);
        assert_close(analytic, &numeric, tol, &format!("param {}", k));
    }
}

fn assert_tensor(a: Tensor, b: Tensor, message: String) {
    assert_eq!(
        a.shape, b.shape,
        "{}[assert_tensor] shape is not same, a.shape={:?}, b.shape={:?}",
        message, a.shape, b.shape
    );

    let a_f32 = a.as_f32_slice();
    let b_f32 = b.as_f32_slice();
    for (i, (a_i, b_i)) in a_f32.iter().zip(b_f32.iter()).enumerate() {
        assert!(
            (a_i - b_i).abs() < 1e-5,
            "{}[assert_tensor] data is not same a.data[{i}]={a_i}, b.data[{i}]={b_i}",
            message
        );
    }
}

#[test]
fn test_argmax_along_axes() {
    let t = Tensor::new(vec![0.1, 0.9, 0.3, 0.8, 0.2, 0.5], vec![2, 3]);
    assert_eq!(t.argmax(Some(1)).to_ids(), vec![1, 0]);
    assert_eq!(t.argmax(Some(0)).to_ids(), vec![1, 0, 1]);
    assert_eq!(t.argmax(None).to_ids(), vec![1]);
}

#[test]
fn test_linear_forward() {
    let w = Tensor::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], vec![2, 3]);
    let b = Tensor::new(vec![1.0, -1.0], vec![2]);
    let x = Tensor::new(vec![0.0, 1.0, 2.0], vec![1, 3]);

    let linear = ml::params::Linear::new(w, b);
    let out = linear.call(vec![x]);

    assert_tensor(Tensor::new(vec![6.0, 13.0], vec![1, 2]), out, String::new());
}

#[test]
fn test_linear_gradients() {
    seed(1);
    let mut linear = ml::params::Linear::auto(3, 2);
    let x = Tensor::new(get_random_normal(12, 0.0, 1.0), vec![2, 2, 3]);
    check_input_grad(&mut linear, &[x.clone()], 0, 1e-2, 1e-2);
    check_param_grads(&mut linear, &[x], 1e-2, 1e-2);
}

#[test]
fn test_softmax_rows_and_gradient() {
    seed(2);
    let x = Tensor::new(get_random_normal(8, 0.0, 1.0), vec![2, 4]);
    let mut softmax = ml::funcs::Softmax::new();
    let out = softmax.call(vec![x.clone()]);
    for row in out.as_f32_slice().chunks(4) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
    check_input_grad(&mut softmax, &[x], 0, 1e-2, 1e-2);
}

#[test]
fn test_nll_value_and_weights() {
    let probs = Tensor::new(vec![0.5, 0.5, 0.1, 0.9], vec![2, 2]);
    let labels = Tensor::from_ids(&[0, 1], vec![2]);
    let nll = ml::funcs::NegativeLogLikelihood::with_offset(0.0);

    let cost = nll.call(vec![probs.clone(), labels.clone()]).get_item().unwrap();
    let expected = -(0.5f32.ln() + 0.9f32.ln()) / 2.0;
    assert!((cost - expected).abs() < 1e-6);

    let w = Tensor::new(vec![1.0, 0.0], vec![2]);
    let cost = nll.call(vec![probs, labels, w]).get_item().unwrap();
    assert!((cost + 0.5f32.ln()).abs() < 1e-6);
}

#[test]
fn test_nll_gradient() {
    let probs = Tensor::new(vec![0.2, 0.3, 0.5, 0.4, 0.35, 0.25], vec![2, 3]);
    let labels = Tensor::from_ids(&[2, 0], vec![2]);
    let weights = Tensor::new(vec![1.0, 0.5], vec![2]);
    let mut nll = ml::funcs::NegativeLogLikelihood::new();
    check_input_grad(&mut nll, &[probs.clone(), labels.clone()], 0, 1e-3, 1e-2);
    check_input_grad(&mut nll, &[probs, labels, weights], 0, 1e-3, 1e-2);
}

#[test]
fn test_activation_gradients() {
    seed(3);
    let x = Tensor::new(get_random_normal(6, 0.0, 1.0), vec![2, 3]);
    check_input_grad(&mut ml::funcs::Tanh::new(), &[x.clone()], 0, 1e-2, 1e-2);
    check_input_grad(&mut ml::funcs::Sigmoid::default(), &[x.clone()], 0, 1e-2, 1e-2);
    check_input_grad(&mut ml::funcs::Identity::new(), &[x], 0, 1e-2, 1e-2);
}

#[test]
fn test_dropout_modes() {
    seed(4);
    let x = Tensor::ones(vec![100]);
    let mut dropout = ml::funcs::Dropout::new();

    let out = dropout.call(vec![x.clone()]);
    assert!(out.as_f32_slice().iter().all(|&v| v == 0.0 || v == 1.0));
    let grad = dropout.backward(&Tensor::ones(vec![100]), vec![&x], &out);
    assert_eq!(grad[0], out, "gradient passes through the kept units only");

    dropout.prepare_inference();
    let out = dropout.call(vec![x]);
    assert!(out.as_f32_slice().iter().all(|&v| v == 0.5));
}

#[test]
fn test_reverse_and_last_step() {
    let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 2]);
    let rev = ml::ops::Reverse::new().call(vec![x.clone()]);
    assert_eq!(rev.as_f32_slice(), &[5.0, 6.0, 3.0, 4.0, 1.0, 2.0]);

    let mut last = ml::ops::LastStep::new();
    let out = last.call(vec![x.clone()]);
    assert_tensor(Tensor::new(vec![5.0, 6.0], vec![2]), out.clone(), String::new());
    let grad = last.backward(&Tensor::ones(vec![2]), vec![&x], &out);
    assert_eq!(grad[0].as_f32_slice(), &[0.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
}

#[test]
fn test_concat_mask_flatten_gradients() {
    seed(5);
    let a = Tensor::new(get_random_normal(6, 0.0, 1.0), vec![2, 3]);
    let b = Tensor::new(get_random_normal(4, 0.0, 1.0), vec![2, 2]);
    let mut concat = ml::ops::Concat::new();
    let out = concat.call(vec![a.clone(), b.clone()]);
    assert_eq!(out.shape, vec![2, 5]);
    assert_eq!(&out.as_f32_slice()[3..5], &b.as_f32_slice()[..2]);
    check_input_grad(&mut concat, &[a.clone(), b.clone()], 0, 1e-2, 1e-2);
    check_input_grad(&mut concat, &[a, b], 1, 1e-2, 1e-2);

    let x = Tensor::new(get_random_normal(12, 0.0, 1.0), vec![3, 2, 2]);
    let mask = Tensor::new(vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0], vec![3, 2]);
    let mut apply = ml::ops::ApplyMask::new();
    let out = apply.call(vec![x.clone(), mask.clone()]);
    assert_eq!(&out.as_f32_slice()[6..], &[0.0; 6]);
    check_input_grad(&mut apply, &[x.clone(), mask], 0, 1e-2, 1e-2);

    let mut flatten = ml::ops::Flatten::new(1);
    assert_eq!(flatten.call(vec![x.clone()]).shape, vec![3, 4]);
    check_input_grad(&mut flatten, &[x], 0, 1e-2, 1e-2);
}

#[test]
fn test_embedding_lookup_and_scatter() {
    let table = Tensor::new(vec![0.0, 0.1, 1.0, 1.1, 2.0, 2.1], vec![3, 2]);
    let mut emb = ml::embedding::Embedding::new(table);
    let ids = Tensor::from_ids(&[2, 0, 2], vec![3, 1]);

    let out = emb.call(vec![ids.clone()]);
    assert_eq!(out.shape, vec![3, 1, 2]);
    assert_eq!(out.as_f32_slice(), &[2.0, 2.1, 0.0, 0.1, 2.0, 2.1]);

    let grad = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 1, 2]);
    emb.backward(&grad, vec![&ids], &out);
    let g = emb.pull_grad().unwrap()[0].clone();
    assert_eq!(g.as_f32_slice(), &[3.0, 4.0, 0.0, 0.0, 6.0, 8.0]);
}

#[test]
#[should_panic(expected = "out of range")]
fn test_embedding_rejects_unknown_id() {
    let emb = ml::embedding::Embedding::new(Tensor::zeros(vec![2, 2]));
    emb.call(vec![Tensor::from_ids(&[2], vec![1])]);
}

#[test]
fn test_xavier_range_and_sigmoid_scale() {
    seed(6);
    use ml::params::Activation;
    let bound = (6.0f32 / (20.0 + 30.0)).sqrt();
    let w = ml::init::xavier_init(20, 30, Activation::Tanh);
    assert_eq!(w.len(), 600);
    assert!(w.iter().all(|v| v.abs() <= bound));

    let w = ml::init::xavier_init(20, 30, Activation::Sigmoid);
    assert!(w.iter().all(|v| v.abs() <= 4.0 * bound));
    assert!(w.iter().any(|v| v.abs() > bound));
}

#[test]
fn test_ortho_weight_is_orthonormal() {
    seed(7);
    let n = 5;
    let w = ml::init::ortho_weight(n, n);
    for i in 0..n {
        for j in 0..n {
            let d: f32 = (0..n).map(|k| w[k * n + i] * w[k * n + j]).sum();
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((d - expected).abs() < 1e-4, "columns {} {} dot {}", i, j, d);
        }
    }
}

mod lstm {
    use super::*;
    use crate::ml::lstm::{Feedback, Lstm};

    const H: usize = 3;
    const D: usize = 2;

    fn inputs(steps: usize, n: usize) -> (Tensor, Tensor) {
        let x = Tensor::new(get_random_normal(steps * n * D, 0.0, 1.0), vec![steps, n, D]);
        (x, Tensor::ones(vec![steps, n]))
    }

    fn randomize_bias(lstm: &mut Lstm) {
        lstm.b = Tensor::new(get_random_uniform(4 * H, -0.5, 0.5), vec![4 * H]);
    }

    #[test]
    fn test_parameter_layout() {
        let lstm = Lstm::new(H, D).with_prefix("enc");
        assert_eq!(lstm.w.shape, vec![D, 4 * H]);
        assert_eq!(lstm.u.shape, vec![H, 4 * H]);
        assert_eq!(lstm.b, Tensor::zeros(vec![4 * H]));
        assert_eq!(lstm.param_names(), ["enc_W", "enc_U", "enc_b"]);
    }

    #[test]
    fn test_output_shape() {
        seed(10);
        let lstm = Lstm::new(H, D);
        let (x, mask) = inputs(4, 2);
        assert_eq!(lstm.call(vec![x, mask]).shape, vec![4, 2, H]);
    }

    #[test]
    fn test_masked_steps_carry_previous_state() {
        seed(11);
        let mut lstm = Lstm::new(H, D);
        randomize_bias(&mut lstm);
        let (x, _) = inputs(3, 2);
        let mask = Tensor::new(vec![1.0, 1.0, 1.0, 0.0, 1.0, 0.0], vec![3, 2]);
        let out = lstm.call(vec![x, mask]);
        let h = out.as_f32_slice();
        let at = |t: usize, s: usize| &h[(t * 2 + s) * H..(t * 2 + s + 1) * H];
        assert_eq!(at(1, 1), at(0, 1));
        assert_eq!(at(2, 1), at(0, 1));
        assert_ne!(at(1, 0), at(0, 0));
    }

    #[test]
    fn test_fully_masked_sample_stays_zero() {
        seed(12);
        let mut lstm = Lstm::new(H, D);
        randomize_bias(&mut lstm);
        let (x, _) = inputs(2, 2);
        let mask = Tensor::new(vec![1.0, 0.0, 1.0, 0.0], vec![2, 2]);
        let out = lstm.call(vec![x, mask]);
        let h = out.as_f32_slice();
        for t in 0..2 {
            assert!(h[(t * 2 + 1) * H..(t * 2 + 2) * H].iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_gradients_through_time() {
        seed(13);
        let mut lstm = Lstm::new(H, D);
        randomize_bias(&mut lstm);
        let (x, _) = inputs(3, 2);
        let mask = Tensor::new(vec![1.0, 1.0, 1.0, 0.0, 1.0, 0.0], vec![3, 2]);
        check_input_grad(&mut lstm, &[x.clone(), mask.clone()], 0, 1e-2, 2e-2);
        check_param_grads(&mut lstm, &[x, mask], 1e-2, 2e-2);
    }

    #[test]
    fn test_context_feedback_matches_repeated_input() {
        seed(14);
        let mut dec = Lstm::new(H, D).with_feedback(Feedback::Context);
        randomize_bias(&mut dec);
        let mut plain = Lstm::new(H, D);
        let (w, u, b) = dec.params();
        plain.set_params(w, u, b);

        let context = Tensor::new(get_random_normal(2 * D, 0.0, 1.0), vec![2, D]);
        let mask = Tensor::ones(vec![3, 2]);
        let repeated = crate::ml::create_batch(vec![context.clone(); 3]);

        let a = dec.call(vec![mask.clone(), context.clone()]);
        let b = plain.call(vec![repeated, mask.clone()]);
        assert_tensor(a, b, "context feedback ".to_string());

        check_input_grad(&mut dec, &[mask.clone(), context.clone()], 1, 1e-2, 2e-2);
        check_param_grads(&mut dec, &[mask, context], 1e-2, 2e-2);
    }

    #[test]
    fn test_custom_feedback_continues_past_inputs() {
        seed(15);
        // dim_input == dim_proj so the hidden state can be fed back directly
        let mut looped = Lstm::new(H, H).with_feedback(Feedback::Custom(Box::new(|h: &Tensor| h.clone())));
        looped.b = Tensor::new(get_random_uniform(4 * H, -0.5, 0.5), vec![4 * H]);
        let x0 = Tensor::new(get_random_normal(2 * H, 0.0, 1.0), vec![1, 2, H]);
        let mask = Tensor::ones(vec![4, 2]);
        let out = looped.call(vec![x0.clone(), mask.clone()]);
        assert_eq!(out.shape, vec![4, 2, H]);

        // replay with the fed-back states as explicit inputs
        let mut full = x0.as_f32_slice().to_vec();
        full.extend_from_slice(&out.as_f32_slice()[..3 * 2 * H]);
        let mut plain = Lstm::new(H, H);
        let (w, u, b) = looped.params();
        plain.set_params(w, u, b);
        let replay = plain.call(vec![Tensor::new(full, vec![4, 2, H]), mask]);
        assert_tensor(out, replay, "custom feedback ".to_string());
    }

    #[test]
    #[should_panic(expected = "no feedback function")]
    fn test_missing_feedback_panics() {
        let lstm = Lstm::new(H, D);
        let (x, _) = inputs(2, 1);
        lstm.call(vec![x, Tensor::ones(vec![3, 1])]);
    }

    #[test]
    fn test_carry_state_between_batches() {
        seed(16);
        let mut lstm = Lstm::new(H, D).carry_state(true);
        randomize_bias(&mut lstm);
        let (x, mask) = inputs(2, 2);

        let first = lstm.call(vec![x.clone(), mask.clone()]);
        lstm.record_output(&first);
        let last = first.as_f32_slice()[2 * H..].to_vec();
        assert_eq!(lstm.final_hidden().unwrap().as_f32_slice(), &last[..]);

        let second = lstm.call(vec![x, mask]);
        assert_ne!(first, second);
        lstm.record_output(&second);
        assert_eq!(
            lstm.final_hidden().unwrap().as_f32_slice(),
            &second.as_f32_slice()[2 * H..]
        );

        // a batch of another size starts from zeros
        let (x3, mask3) = inputs(2, 3);
        let mut fresh = Lstm::new(H, D);
        fresh.set_params(lstm.w.clone(), lstm.u.clone(), lstm.b.clone());
        assert_tensor(
            lstm.call(vec![x3.clone(), mask3.clone()]),
            fresh.call(vec![x3, mask3]),
            "carry reset ".to_string(),
        );
    }

    #[test]
    fn test_carry_state_gradients_in_graph() {
        seed(17);
        let mut lstm = Lstm::new(H, D).carry_state(true);
        randomize_bias(&mut lstm);
        let (w, u, b) = lstm.params();

        let mut g = crate::ml::Graph::new();
        let x = g.push_placeholder();
        let mask = g.push_placeholder();
        let id = g.add_layer(vec![x, mask], Box::new(lstm));
        g.set_target(id);
        g.set_placeholder(vec![x, mask]);
        g.set_train_mode();

        let (x1, m1) = inputs(2, 2);
        let first = g.forward(vec![x1, m1]);
        g.reset();
        let h0 = Tensor::new(first.as_f32_slice()[2 * H..].to_vec(), vec![1, 2, H]);

        let (x2, _) = inputs(3, 2);
        let m2 = Tensor::new(vec![1.0, 1.0, 1.0, 0.0, 1.0, 0.0], vec![3, 2]);
        g.zero_grad();
        g.forward(vec![x2.clone(), m2.clone()]);
        g.backward();
        let analytic: Vec<Vec<f32>> = g.layers[id]
            .pull_grad()
            .unwrap()
            .iter()
            .map(|t| t.as_f32_slice().to_vec())
            .collect();
        g.reset();

        // same parameters, started from the first batch's last state
        let mut from_h0 = Lstm::new(H, D).carry_state(true);
        from_h0.set_params(w, u, b);
        from_h0.record_output(&h0);
        for (k, analytic) in analytic.iter().enumerate() {
            let base = from_h0.param_tensors()[k].as_f32_slice().to_vec();
            let numeric = numeric_grad(
                |v| {
                    from_h0.param_tensors_mut()[k].f32_data_mut().copy_from_slice(v);
                    from_h0
                        .call(vec![x2.clone(), m2.clone()])
                        .as_f32_slice()
                        .iter()
                        .sum()
                },
                &base,
                1e-2,
            );
            from_h0.param_tensors_mut()[k]
                .f32_data_mut()
                .copy_from_slice(&base);
            assert_close(analytic, &numeric, 2e-2, &format!("carried param {}", k));
        }
    }
}

#[test]
fn test_graph_accumulates_shared_node() {
    use crate::ml::embedding::Embedding;
    use crate::ml::funcs::Identity;
    use crate::ml::ops::Concat;

    let mut g = ml::Graph::new();
    let ids = g.push_placeholder();
    let emb = g.add_layer(vec![ids], Box::new(Embedding::new(Tensor::zeros(vec![3, 2]))));
    let a = g.add_layer(vec![emb], Box::new(Identity::new()));
    let b = g.add_layer(vec![emb], Box::new(Identity::new()));
    let c = g.add_layer(vec![a, b], Box::new(Concat::new()));
    g.set_target(c);
    g.set_placeholder(vec![ids]);

    g.forward(vec![Tensor::from_ids(&[0, 1, 1], vec![3])]);
    g.backward();
    let grad = g.layers[emb].pull_grad().unwrap()[0].clone();
    assert_eq!(grad.as_f32_slice(), &[2.0, 2.0, 4.0, 4.0, 0.0, 0.0]);
}

#[test]
fn test_inference_evaluates_shared_input_once() {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::ml::ops::Concat;

    struct CountCalls(Rc<Cell<usize>>);

    impl Node for CountCalls {
        fn call(&self, input: Vec<Tensor>) -> Tensor {
            self.0.set(self.0.get() + 1);
            input[0].clone()
        }
        fn backward(&mut self, grad: &Tensor, _: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
            vec![grad.clone()]
        }
    }

    let calls = Rc::new(Cell::new(0));
    let mut g = ml::Graph::new();
    let x = g.push_placeholder();
    let n = g.add_layer(vec![x], Box::new(CountCalls(calls.clone())));
    let c = g.add_layer(vec![n, n], Box::new(Concat::new()));
    g.set_target(c);
    g.set_placeholder(vec![x]);

    let out = g.inference(vec![Tensor::ones(vec![1, 2])]);
    assert_eq!(out.shape, vec![1, 4]);
    assert_eq!(calls.get(), 1);

    g.forward(vec![Tensor::ones(vec![1, 2])]);
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_optimize_skips_layers_without_gradient() {
    use crate::ml::params::Linear;

    let mut g = ml::Graph::new();
    let x = g.push_placeholder();
    let used = crate::sequential!(g, x, [Linear::auto(2, 2)]);
    let unused = g.add_layer(vec![x], Box::new(Linear::auto(2, 2)));
    g.set_target(used);
    g.set_placeholder(vec![x]);
    g.set_optimizer(ml::optim::SGD::new(0.1));

    let before = g.layers[unused].param_tensors()[0].clone();
    g.forward(vec![Tensor::ones(vec![1, 2])]);
    g.backward();
    g.optimize();
    g.reset();
    assert_eq!(g.layers[unused].param_tensors()[0], &before);
    assert!(g.layers[used].pull_grad().is_none());
}

#[test]
fn test_flat_params_round_trip() {
    use crate::ml::params::Linear;

    let mut g = ml::Graph::new();
    let x = g.push_placeholder();
    crate::sequential!(g, x, [Linear::auto(3, 2), ml::funcs::Tanh::new(), Linear::auto(2, 1)]);
    let flat = g.flat_params();
    assert_eq!(flat.len(), 3 * 2 + 2 + 2 + 1);
    let shifted: Vec<f32> = flat.iter().map(|v| v + 1.0).collect();
    g.set_flat_params(&shifted);
    assert_eq!(g.flat_params(), shifted);
    assert_eq!(g.flat_grads(), vec![0.0; flat.len()]);
}

mod optim {
    use super::*;
    use crate::ml::optim::{conjugate_gradient, Adadelta, ClippedSGD, RMSProp, SGD};
    use crate::ml::Optimizer;

    #[test]
    fn test_sgd_step_and_learning_rate() {
        let g = Tensor::new(vec![1.0, -2.0], vec![2]);
        let mut sgd = SGD::new(0.5);
        assert_eq!(sgd.optimize(0, vec![&g])[0].as_f32_slice(), &[-0.5, 1.0]);
        sgd.set_learning_rate(0.1);
        assert_tensor(
            sgd.optimize(0, vec![&g])[0].clone(),
            Tensor::new(vec![-0.1, 0.2], vec![2]),
            String::new(),
        );
    }

    #[test]
    fn test_clipped_sgd_rescales_large_norms() {
        let g = Tensor::new(vec![6.0, 8.0], vec![2]);
        let mut opt = ClippedSGD::new(1.0);
        opt.begin_step(10.0);
        let up = opt.optimize(0, vec![&g]);
        assert_tensor(up[0].clone(), Tensor::new(vec![-3.0, -4.0], vec![2]), String::new());

        opt.begin_step(2.0);
        let up = opt.optimize(0, vec![&g]);
        assert_tensor(up[0].clone(), Tensor::new(vec![-6.0, -8.0], vec![2]), String::new());
    }

    #[test]
    fn test_sequence_model_sgd_clips() {
        use crate::config::{EncDecConfig, OptimizerKind};

        let config = EncDecConfig {
            optimizer: OptimizerKind::Sgd,
            lrate: 1.0,
            ..Default::default()
        };
        let mut opt =
            crate::models::build_optimizer(config.optimizer, config.lrate, config.clip_norm);
        let g = Tensor::new(vec![6.0, 8.0], vec![2]);
        opt.begin_step(10.0);
        let up = opt.optimize(0, vec![&g]);
        assert_tensor(up[0].clone(), Tensor::new(vec![-3.0, -4.0], vec![2]), String::new());

        let bad = EncDecConfig {
            clip_norm: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_adadelta_updates() {
        let g = Tensor::new(vec![2.0], vec![1]);
        let mut opt = Adadelta::new();
        let rg2 = 0.05 * 4.0f32;
        let ud1 = -(1e-6f32).sqrt() / (rg2 + 1e-6).sqrt() * 2.0;
        let up = opt.optimize(3, vec![&g]);
        assert!((up[0].data[0] - ud1).abs() < 1e-7);

        let ru2 = 0.05 * ud1 * ud1;
        let rg2 = 0.95 * rg2 + 0.05 * 4.0;
        let ud2 = -(ru2 + 1e-6).sqrt() / (rg2 + 1e-6).sqrt() * 2.0;
        let up = opt.optimize(3, vec![&g]);
        assert!((up[0].data[0] - ud2).abs() < 1e-7);

        // state is per layer
        let up = opt.optimize(4, vec![&g]);
        assert!((up[0].data[0] - ud1).abs() < 1e-7);
    }

    #[test]
    fn test_rmsprop_updates() {
        let g = Tensor::new(vec![1.0], vec![1]);
        let mut opt = RMSProp::new();
        let (rg, rg2) = (0.05f32, 0.05f32);
        let ud1 = -1e-4 / (rg2 - rg * rg + 1e-4f32).sqrt();
        let up = opt.optimize(0, vec![&g]);
        assert!((up[0].data[0] - ud1).abs() < 1e-8);

        let (rg, rg2) = (0.95 * rg + 0.05, 0.95 * rg2 + 0.05);
        let ud2 = 0.9 * ud1 - 1e-4 / (rg2 - rg * rg + 1e-4f32).sqrt();
        let up = opt.optimize(0, vec![&g]);
        assert!((up[0].data[0] - ud2).abs() < 1e-8);
    }

    #[test]
    fn test_conjugate_gradient_on_quadratic() {
        // f(x) = (x0 - 1)^2 + 10 (x1 + 2)^2
        let f = |x: &[f32]| {
            let cost = (x[0] - 1.0).powi(2) + 10.0 * (x[1] + 2.0).powi(2);
            (cost, vec![2.0 * (x[0] - 1.0), 20.0 * (x[1] + 2.0)])
        };
        let mut calls = 0;
        let result = conjugate_gradient(f, vec![0.0, 0.0], 100, |_| calls += 1);
        assert!((result.x[0] - 1.0).abs() < 1e-3, "{:?}", result);
        assert!((result.x[1] + 2.0).abs() < 1e-3, "{:?}", result);
        assert!(result.cost < 1e-5);
        assert!(calls > 0);
    }
}

#[test]
fn test_early_stopping_patience() {
    use crate::ml::early_stopping::EarlyStopping;

    let mut stop = EarlyStopping::new(10, 2, 0.995, 100);
    assert_eq!(stop.validation_frequency(), 5);
    assert!(stop.should_validate(4));
    assert!(!stop.should_validate(5));

    assert!(stop.observe(4, 0.5));
    assert_eq!(stop.patience(), 10);
    assert!(stop.observe(9, 0.4));
    assert_eq!(stop.patience(), 18);
    // better but not by the threshold: no extra patience
    assert!(stop.observe(14, 0.3999));
    assert_eq!(stop.patience(), 18);
    assert!(!stop.observe(19, 0.45));
    assert_eq!(stop.best_iter(), Some(14));
    assert!(!stop.should_stop(17));
    assert!(stop.should_stop(18));
}

#[test]
fn test_metrics() {
    let p = Tensor::new(vec![0.9, 0.1, 0.2, 0.8, 0.6, 0.4], vec![3, 2]);
    let y = Tensor::from_ids(&[0, 0, 0], vec![3]);
    assert!((ml::metrics::accuracy(&p, &y) - 2.0 / 3.0).abs() < 1e-6);
    assert_eq!(ml::metrics::errors(&p, &y), 1);
    assert!((ml::metrics::zero_one_loss(&p, &y) - 1.0 / 3.0).abs() < 1e-6);
}

mod dict {
    use crate::dict::{Dict, PAD, UNK};
    use crate::ml::Tensor;

    fn sentences() -> Vec<&'static str> {
        vec!["the cat sat", "the dog sat", "the <UNK> ran", "a cat"]
    }

    #[test]
    fn test_ids_by_frequency() {
        let d = Dict::new(&sentences(), 3, 4);
        // the:3, cat:2, sat:2, then a/dog/ran:1
        assert_eq!(d.num_words(), 5);
        assert_eq!(d.id("<PAD>"), PAD);
        assert_eq!(d.id("<UNK>"), UNK);
        assert_eq!(d.id("the"), 2);
        assert_eq!(d.id("cat"), 3);
        assert_eq!(d.id("sat"), 4);
        assert_eq!(d.id("dog"), UNK);
        assert_eq!(d.read_sentence("the dog sat"), vec![2, UNK, 4]);
        assert_eq!(d.wemb().shape, vec![5, 4]);
        assert!(d.wemb().as_f32_slice().iter().all(|&v| (0.0..0.01).contains(&v)));
    }

    #[test]
    fn test_literal_unk_is_not_a_word() {
        let d = Dict::new(&["<UNK> <UNK> <UNK> x"], 5, 2);
        assert_eq!(d.num_words(), 3);
        assert_eq!(d.id("x"), 2);
    }

    #[test]
    fn test_noise_distribution() {
        let d = Dict::new(&sentences(), 3, 4);
        let noise = d.noise_distribution();
        assert_eq!(noise.len(), d.num_words());
        assert_eq!(noise[PAD], 0.0);
        assert!((noise.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        // dropped: a, dog, ran, <UNK> (1 each) out of 11 tokens
        assert!((noise[UNK] - 4.0 / 11.0).abs() < 1e-6);
        assert!((noise[2] - 3.0 / 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_idx_to_words_reads_columns() {
        let d = Dict::new(&sentences(), 3, 4);
        let idx = Tensor::from_ids(&[2, 3, 4, 0], vec![2, 2]);
        assert_eq!(d.idx_to_words(&idx), vec!["the sat", "cat <PAD>"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let d = Dict::new(&sentences(), 3, 4);
        d.save(dir.path()).unwrap();
        let loaded = Dict::load(dir.path()).unwrap();
        assert_eq!(loaded.num_words(), d.num_words());
        assert_eq!(loaded.id("sat"), d.id("sat"));
        assert_eq!(loaded.wemb(), d.wemb());
        assert_eq!(loaded.noise_distribution(), d.noise_distribution());
    }
}

#[test]
fn test_pad_and_mask() {
    let batch = crate::sequence::pad_and_mask(&[vec![5, 6, 7], vec![8]]);
    assert_eq!(batch.x.shape, vec![3, 2]);
    assert_eq!(batch.x.to_ids(), vec![5, 8, 6, 0, 7, 0]);
    assert_eq!(batch.mask.as_f32_slice(), &[1.0, 1.0, 1.0, 0.0, 1.0, 0.0]);
    assert_eq!(batch.lengths, vec![3, 1]);
}

#[test]
fn test_minibatch_indices() {
    let batches = crate::sequence::minibatch_indices(7, 3, false);
    assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);

    seed(20);
    let mut all: Vec<usize> = crate::sequence::minibatch_indices(7, 3, true)
        .into_iter()
        .flatten()
        .collect();
    all.sort();
    assert_eq!(all, (0..7).collect::<Vec<_>>());
}

#[test]
fn test_ngrams_left_padding() {
    let pairs = crate::corpus::ngrams(&[5, 6, 7], 2);
    assert_eq!(
        pairs,
        vec![(vec![0, 0], 5), (vec![0, 5], 6), (vec![5, 6], 7)]
    );
}

#[test]
fn test_ngram_corpus_split_and_loader() {
    use crate::corpus::NgramCorpus;
    use crate::dataset::Dataloader;

    let sentences = ["a b c d", "b c d e", "c d"];
    let corpus = NgramCorpus::from_sentences(&sentences, 10, 3, 2, 0.2);
    assert_eq!(corpus.train.len() + corpus.valid.len(), 10);
    assert_eq!(corpus.valid.len(), 2);
    // the last two pairs of "c d" are the validation set
    let c = corpus.dictionary.id("c");
    let d = corpus.dictionary.id("d");
    assert_eq!(corpus.valid.targets, vec![c, d]);

    let loader = Dataloader::new(corpus.train.clone(), 3, false).in_order();
    let batches: Vec<_> = loader.iter_batch().collect();
    assert_eq!(batches.len(), loader.n_batches());
    assert_eq!(batches[0].context.shape, vec![3, 2]);
    assert_eq!(batches[0].target.shape, vec![3]);
    assert_eq!(batches[2].target.shape, vec![2]);
    assert_eq!(batches[0].target.to_ids(), corpus.train.targets[..3].to_vec());

    let strict = Dataloader::new(corpus.train.clone(), 3, true);
    assert_eq!(strict.iter_batch().count(), 2);
}

#[test]
fn test_param_files_check_layer_type() {
    use crate::ml::embedding::Embedding;
    use crate::ml::params::Linear;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("0.param");
    let linear = Linear::auto(2, 2);
    linear.save_param(&path).unwrap();

    let mut copy = Linear::zeros(2, 2);
    copy.load_param(&path).unwrap();
    assert_eq!(copy.w, linear.w);

    let mut emb = Embedding::new(Tensor::zeros(vec![2, 2]));
    assert!(emb.load_param(&path).is_err());
    let mut wrong_shape = Linear::zeros(3, 2);
    assert!(wrong_shape.load_param(&path).is_err());
}

mod training {
    use std::fs;
    use std::path::Path;

    use super::assert_tensor;
    use crate::config::{load_config, EncDecConfig, LogisticConfig, LogisticMethod, NplmConfig};
    use crate::corpus::{MnistSplit, NgramCorpus, ParallelCorpus, MNIST_PIXELS};
    use crate::models::enc_dec::{self, EncDecBatch};
    use crate::models::logistic::{self, LogisticModel, MnistData, N_CLASSES};
    use crate::models::nplm::{self, Nplm};
    use crate::utills::rand::seed;
    use crate::CutilsError;

    /// Label 0 lights the first half of the image, label 1 the second.
    fn write_mnist(path: &Path, rows: usize) {
        let half = MNIST_PIXELS / 2;
        let mut text = String::new();
        for r in 0..rows {
            let label = r % 2;
            let pixels: Vec<&str> = (0..MNIST_PIXELS)
                .map(|p| if (p < half) == (label == 0) { "255" } else { "0" })
                .collect();
            text.push_str(&format!("{},{}\n", label, pixels.join(",")));
        }
        fs::write(path, text).unwrap();
    }

    fn mnist_config(dir: &Path) -> LogisticConfig {
        write_mnist(&dir.join("train.csv"), 20);
        write_mnist(&dir.join("valid.csv"), 6);
        write_mnist(&dir.join("test.csv"), 6);
        LogisticConfig {
            n_epochs: 5,
            batch_size: 5,
            patience: 100,
            train_path: dir.join("train.csv"),
            valid_path: dir.join("valid.csv"),
            test_path: dir.join("test.csv"),
            model_dir: Some(dir.join("best_model")),
            ..Default::default()
        }
    }

    #[test]
    fn test_mnist_csv_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        write_mnist(&path, 3);
        let split = MnistSplit::from_csv(&path).unwrap();
        assert_eq!(split.len(), 3);
        let (x, y) = split.batch(&[0, 1]);
        assert_eq!(x.shape, vec![2, MNIST_PIXELS]);
        assert_eq!(y.to_ids(), vec![0, 1]);
        assert_eq!(x.as_f32_slice()[0], 1.0);
        assert_eq!(x.as_f32_slice()[MNIST_PIXELS], 0.0);

        fs::write(&path, "3,0,0,0\n").unwrap();
        assert!(matches!(
            MnistSplit::from_csv(&path),
            Err(CutilsError::Format { .. })
        ));
    }

    #[test]
    fn test_logistic_sgd_separates_classes() {
        seed(30);
        let dir = tempfile::tempdir().unwrap();
        let config = mnist_config(dir.path());
        let data = MnistData::load(&config).unwrap();

        let (mut model, report) = logistic::train(&config, &data).unwrap();
        assert_eq!(report.epochs, 5);
        assert_eq!(report.best_iter, Some(3));
        assert_eq!(report.best_validation_error, 0.0);
        assert_eq!(report.test_error, 0.0);

        let model_dir = config.model_dir.as_ref().unwrap();
        let mut restored = LogisticModel::new(MNIST_PIXELS, N_CLASSES, 0.1);
        restored.load(model_dir).unwrap();
        let (x, y) = data.test.batch(&[0, 1, 2]);
        assert_eq!(restored.predict(x.clone()), y.to_ids());
        assert_eq!(model.predict(x), y.to_ids());
    }

    #[test]
    fn test_logistic_patience_checked_after_epoch() {
        seed(35);
        let dir = tempfile::tempdir().unwrap();
        let base = mnist_config(dir.path());
        write_mnist(&base.train_path, 5);
        let config = LogisticConfig {
            n_epochs: 3,
            batch_size: 1,
            patience: 2,
            model_dir: None,
            ..base
        };
        let data = MnistData::load(&config).unwrap();

        let (_, report) = logistic::train(&config, &data).unwrap();
        // patience runs out at the third update, the epoch still completes
        assert_eq!(report.epochs, 1);
        assert_eq!(report.updates, 5);
        assert_eq!(report.best_iter, Some(1));
        assert_eq!(report.best_validation_error, 0.0);
    }

    #[test]
    fn test_logistic_error_rate_over_full_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        write_mnist(&path, 6);
        let split = MnistSplit::from_csv(&path).unwrap();
        // untrained model predicts class 0, labels alternate 0, 1
        let mut model = LogisticModel::new(MNIST_PIXELS, N_CLASSES, 0.1);
        assert!((model.error_rate(&split, 5) - 0.4).abs() < 1e-6);
        assert!((model.error_rate(&split, 2) - 0.5).abs() < 1e-6);
        assert!((model.error_rate(&split, 10) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_logistic_conjugate_gradient() {
        seed(31);
        let dir = tempfile::tempdir().unwrap();
        let config = LogisticConfig {
            method: LogisticMethod::Cg,
            cg_max_iter: 5,
            ..mnist_config(dir.path())
        };
        let data = MnistData::load(&config).unwrap();
        let (_, report) = logistic::train(&config, &data).unwrap();
        assert_eq!(report.best_validation_error, 0.0);
        assert_eq!(report.test_error, 0.0);
        assert!(report.best_iter.is_some());
    }

    #[test]
    fn test_logistic_rejects_bad_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogisticConfig {
            batch_size: 0,
            ..mnist_config(dir.path())
        };
        let data = MnistData::load(&config).unwrap();
        assert!(matches!(
            logistic::train(&config, &data),
            Err(CutilsError::Config(_))
        ));

        // more samples per batch than the training set holds
        let config = LogisticConfig {
            batch_size: 50,
            ..config
        };
        assert!(logistic::train(&config, &data).is_err());
    }

    fn nplm_sentences() -> Vec<&'static str> {
        vec![
            "the cat sat on the mat",
            "the dog sat on the log",
            "a cat saw the dog",
            "the dog saw a cat",
            "the cat sat on the log",
        ]
    }

    #[test]
    fn test_nplm_training_and_reload() {
        seed(32);
        let dir = tempfile::tempdir().unwrap();
        let config = NplmConfig {
            learning_rate: 0.5,
            n_epochs: 20,
            batch_size: 4,
            n_in: 6,
            n_h1: 12,
            n_h2: 6,
            context_size: 2,
            n_words: 20,
            valid_fraction: 0.2,
            model_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let corpus = NgramCorpus::from_sentences(
            &nplm_sentences(),
            config.n_words,
            config.n_in,
            config.context_size,
            config.valid_fraction,
        );
        let n_train = corpus.train.len();
        assert_eq!(n_train + corpus.valid.len(), 28);
        assert_eq!(corpus.valid.len(), 5);

        let (mut model, report) = nplm::train(&config, &corpus).unwrap();
        assert_eq!(report.updates, config.n_epochs * n_train.div_ceil(4));
        assert!(report.last_cost.is_finite());
        assert!(report.valid_cost.is_finite());
        let uniform = (corpus.dictionary.num_words() as f32).ln();
        assert!(model.pred_cost(&corpus.train, 4) < uniform);
        assert_eq!(
            model.wemb().unwrap().shape,
            vec![corpus.dictionary.num_words(), config.n_in]
        );

        let (context, _) = corpus.valid.batch(&[0, 1]);
        let probs = model.predict_proba(context.clone());
        for row in probs.as_f32_slice().chunks(corpus.dictionary.num_words()) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }

        let mut restored = Nplm::new(&corpus.dictionary, 2, 12, 6, 0.5, 5.0);
        restored.load(dir.path()).unwrap();
        assert_tensor(
            restored.predict_proba(context),
            probs,
            "reloaded nplm ".to_string(),
        );
    }

    #[test]
    fn test_nplm_config_validation() {
        let corpus = NgramCorpus::from_sentences(&nplm_sentences(), 20, 4, 2, 0.2);
        let config = NplmConfig {
            valid_fraction: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            nplm::train(&config, &corpus),
            Err(CutilsError::Config(_))
        ));
    }

    fn parallel_corpus(dim_proj: usize) -> ParallelCorpus {
        let source = [
            "ich sehe die katze",
            "die katze sieht mich",
            "ich sehe den hund",
            "der hund sieht die katze",
            "die katze schläft",
            "der hund schläft",
        ];
        let target = [
            "i see the cat",
            "the cat sees me",
            "i see the dog",
            "the dog sees the cat",
            "the cat sleeps",
            "the dog sleeps",
        ];
        ParallelCorpus::from_sentences(&source, &target, 20, 20, dim_proj, 0.34).unwrap()
    }

    #[test]
    fn test_parallel_corpus_alignment() {
        let corpus = parallel_corpus(4);
        assert_eq!(corpus.train.len(), 4);
        assert_eq!(corpus.valid.len(), 2);
        let (src, tgt) = &corpus.valid[1];
        assert_eq!(corpus.source_dict.word(src[0]), Some("der"));
        assert_eq!(corpus.target_dict.word(*tgt.last().unwrap()), Some("sleeps"));

        assert!(matches!(
            ParallelCorpus::from_sentences(&["a b"], &["x", "y"], 5, 5, 4, 0.0),
            Err(CutilsError::Format { .. })
        ));
        // pairs with an empty side are dropped
        let corpus = ParallelCorpus::from_sentences(&["a b", ""], &["x", "y"], 5, 5, 4, 0.0).unwrap();
        assert_eq!(corpus.train.len(), 1);
    }

    #[test]
    fn test_enc_dec_batch_layout() {
        let corpus = parallel_corpus(4);
        let batch = EncDecBatch::from_pairs(&corpus.train, &[3, 0]);
        assert_eq!(batch.n_samples(), 2);
        assert_eq!(batch.x.shape, vec![5, 2]);
        assert_eq!(batch.y.shape, vec![5, 2]);
        assert_eq!(&batch.mask_y.as_f32_slice()[8..], &[1.0, 0.0]);
    }

    #[test]
    fn test_enc_dec_training_and_decode() {
        seed(33);
        let dir = tempfile::tempdir().unwrap();
        let config = EncDecConfig {
            dim_proj: 4,
            batch_size: 2,
            valid_batch_size: 2,
            max_epochs: 2,
            model_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let corpus = parallel_corpus(config.dim_proj);

        let (mut model, report) = enc_dec::train(&config, &corpus).unwrap();
        assert_eq!(report.epochs, 2);
        assert_eq!(report.updates, 4);
        assert!(report.last_cost.is_finite());
        assert!(report.best_valid_cost.is_finite());
        // the source embedding follows the four placeholders
        assert!(dir.path().join("4.param").exists());

        let batch = EncDecBatch::from_pairs(&corpus.valid, &[0, 1]);
        let cost = model.cost(&batch);
        assert!(cost.is_finite() && cost > 0.0);
        // inference mode makes validation deterministic
        assert_eq!(model.cost(&batch), cost);

        let decoded = model.decode(batch.x.clone(), batch.mask_x.clone(), 3);
        assert_eq!(decoded.shape, vec![3, 2]);
        assert!(decoded.to_ids().iter().all(|&id| id < model.ydim));
        assert_eq!(corpus.target_dict.idx_to_words(&decoded).len(), 2);
    }

    #[test]
    fn test_enc_dec_sgd_without_dropout() {
        seed(34);
        let config = EncDecConfig {
            dim_proj: 4,
            batch_size: 3,
            max_epochs: 1,
            optimizer: crate::config::OptimizerKind::Sgd,
            lrate: 0.1,
            use_dropout: false,
            valid_fraction: 0.0,
            ..Default::default()
        };
        let corpus = ParallelCorpus::from_sentences(
            &["a b c", "b c", "c a"],
            &["x y", "y", "z x"],
            10,
            10,
            4,
            0.0,
        )
        .unwrap();
        let (_, report) = enc_dec::train(&config, &corpus).unwrap();
        assert_eq!(report.updates, 1);
        assert_eq!(report.best_valid_cost, f32::INFINITY);
    }

    #[test]
    fn test_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nplm.json");
        fs::write(&path, r#"{"batch_size": 8, "context_size": 3}"#).unwrap();
        let config: NplmConfig = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.context_size, 3);
        assert_eq!(config.n_h1, NplmConfig::default().n_h1);

        fs::write(&path, r#"{"optimizer": "rmsprop"}"#).unwrap();
        let config: EncDecConfig = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.optimizer, crate::config::OptimizerKind::Rmsprop);

        fs::write(&path, "{ not json").unwrap();
        let bad: crate::Result<NplmConfig> = load_config(Some(path.as_path()));
        assert!(matches!(bad, Err(CutilsError::Json(_))));

        let defaults: LogisticConfig = load_config(None).unwrap();
        assert_eq!(defaults.batch_size, 600);
    }
}
