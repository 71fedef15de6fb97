use bartsum::lr_finder::{suggest, LrSweep, SmoothedLoss};
use bartsum::schedule::{exp_interp, OneCycle};
use bartsum::ParamGroup;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12_f64.max(b.abs() * 1e-9)
}

#[test]
fn test_one_cycle_endpoints() {
    let sched = OneCycle::new(1e-4);
    let total = 101;
    assert!(close(sched.lr_at(0, total), 1e-4 / 25.0));
    assert!(close(sched.lr_at(25, total), 1e-4));
    assert!(close(sched.lr_at(100, total), sched.final_lr()));
}

#[test]
fn test_one_cycle_warms_up_then_anneals() {
    let sched = OneCycle::new(3e-5);
    let total = 200;
    let lrs: Vec<f64> = (0..total).map(|s| sched.lr_at(s, total)).collect();
    let peak = lrs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();

    assert!(lrs[..=peak].windows(2).all(|w| w[0] <= w[1]));
    assert!(lrs[peak..].windows(2).all(|w| w[0] >= w[1]));
    assert!(lrs.iter().all(|&lr| lr > 0.0 && lr <= 3e-5 + 1e-18));
}

#[test]
fn test_one_cycle_single_step() {
    let sched = OneCycle::new(1e-3);
    assert_eq!(sched.lr_at(0, 1), 1e-3);
    assert_eq!(sched.lr_at(0, 0), 1e-3);
}

#[test]
fn test_exp_interp() {
    assert!(close(exp_interp(1e-7, 10.0, 0.0), 1e-7));
    assert!(close(exp_interp(1e-7, 10.0, 1.0), 10.0));
    assert!(close(exp_interp(1e-4, 1e-2, 0.5), 1e-3));
}

#[test]
fn test_smoothed_loss_is_bias_corrected() {
    let mut smoothed = SmoothedLoss::new(0.98);
    assert!(close(smoothed.update(2.0), 2.0));
    assert!(close(smoothed.update(2.0), 2.0));
}

#[test]
fn test_suggest_finds_min_and_steepest() {
    let lrs: Vec<f64> = (0..6).map(|i| 10f64.powi(i - 6)).collect();
    let losses = vec![5.0, 4.9, 3.0, 2.5, 2.4, 6.0];
    let suggestion = suggest(&LrSweep { lrs: lrs.clone(), losses }).unwrap();

    assert!(close(suggestion.lr_min, lrs[4] / 10.0));
    assert!(close(suggestion.lr_steep, lrs[2]));
}

#[test]
fn test_suggest_needs_two_points() {
    assert!(suggest(&LrSweep::default()).is_none());
    assert!(suggest(&LrSweep {
        lrs: vec![1e-3],
        losses: vec![1.0]
    })
    .is_none());
}

#[test]
fn test_param_group_of_bart_variables() {
    assert_eq!(
        ParamGroup::of("model.encoder.layers.0.self_attn.k_proj.weight"),
        ParamGroup::Encoder
    );
    assert_eq!(
        ParamGroup::of("model.decoder.layer_norm_embedding.bias"),
        ParamGroup::Decoder
    );
    assert_eq!(ParamGroup::of("model.shared.weight"), ParamGroup::Head);
    assert_eq!(ParamGroup::of("final_logits_bias"), ParamGroup::Head);
}

#[test]
fn test_trainable_groups_for_freeze_points() {
    assert_eq!(ParamGroup::trainable_under(1), &[ParamGroup::Head]);
    assert_eq!(
        ParamGroup::trainable_under(2),
        &[ParamGroup::Decoder, ParamGroup::Head]
    );
    assert_eq!(ParamGroup::trainable_under(3), &ParamGroup::ALL);
    assert_eq!(ParamGroup::trainable_under(10), &ParamGroup::ALL);
    assert_eq!(ParamGroup::Encoder.to_string(), "encoder");
}
