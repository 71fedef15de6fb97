mod common;

use anyhow::{Context, Result};
use bartsum::artifact::{self, Artifact, ArtifactManifest};
use bartsum::lr_finder::{find_lr, LrFinderConfig};
use bartsum::{ParamGroup, Stage, Summarizer, TrainConfig, Trainer};
use common::{create_tokenizer, load_tiny_summarizer, loader, snapshot};
use tch::{Device, Tensor};

fn tiny_trainer(summarizer: Summarizer, grad_clip: f64) -> Trainer {
    match Trainer::new(summarizer, 1, 0.01, grad_clip) {
        Ok(trainer) => trainer,
        Err(e) => panic!("failed to build trainer: {}", e),
    }
}

fn changed(before: &[(String, Tensor)], after: &[(String, Tensor)], group: ParamGroup) -> bool {
    before
        .iter()
        .zip(after)
        .filter(|((name, _), _)| ParamGroup::of(name) == group)
        .any(|((_, a), (_, b))| !a.equal(b))
}

#[test]
fn test_fit_stages_keeps_frozen_encoder() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let tokenizer = create_tokenizer(dir.path())?;
    let train = loader(&tokenizer, true)?;
    let valid = loader(&tokenizer, false)?;
    let summarizer = load_tiny_summarizer(dir.path())?;
    let before = snapshot(&summarizer);

    let mut trainer = tiny_trainer(summarizer, 1.0);
    let stages = [Stage {
        freeze_to: Some(2),
        epochs: 2,
        lr_max: 1e-3,
    }];
    trainer.fit_stages(&stages, &train, &valid)?;

    let after = snapshot(trainer.summarizer());
    assert!(!changed(&before, &after, ParamGroup::Encoder));
    assert!(changed(&before, &after, ParamGroup::Decoder));
    assert!(changed(&before, &after, ParamGroup::Head));

    let (_, history) = trainer.into_parts();
    assert_eq!(history.len(), 2);
    for (i, record) in history.iter().enumerate() {
        assert_eq!(record.stage, 0);
        assert_eq!(record.epoch, i);
        assert!(record.train_loss.is_finite());
        assert!(record.valid_loss.is_some_and(f64::is_finite));
    }
    Ok(())
}

#[test]
fn test_epoch_count_runs_across_stages() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let tokenizer = create_tokenizer(dir.path())?;
    let train = loader(&tokenizer, true)?;
    let valid = loader(&tokenizer, false)?;
    let mut trainer = tiny_trainer(load_tiny_summarizer(dir.path())?, 1.0);

    let stages = [
        Stage {
            freeze_to: Some(1),
            epochs: 1,
            lr_max: 1e-3,
        },
        Stage {
            freeze_to: None,
            epochs: 2,
            lr_max: 5e-4,
        },
    ];
    trainer.fit_stages(&stages, &train, &valid)?;
    assert_eq!(trainer.epochs_run(), 3);

    let (_, history) = trainer.into_parts();
    let stage_epochs: Vec<(usize, usize)> = history.iter().map(|r| (r.stage, r.epoch)).collect();
    assert_eq!(stage_epochs, vec![(0, 0), (1, 0), (1, 1)]);
    Ok(())
}

#[test]
fn test_non_finite_loss_is_an_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let tokenizer = create_tokenizer(dir.path())?;
    let train = loader(&tokenizer, false)?;
    let summarizer = load_tiny_summarizer(dir.path())?;

    let mut shared = summarizer
        .vs
        .variables()
        .remove("model.shared.weight")
        .context("missing shared embeddings")?;
    tch::no_grad(|| {
        let _ = shared.fill_(f64::NAN);
    });

    let mut trainer = tiny_trainer(summarizer, 1.0);
    let batch = train.batches(0).next().context("no batch")??;
    assert!(trainer.train_step(&batch).is_err());

    // The sweep reports divergence instead of failing.
    let sweep = find_lr(&mut trainer, &train, &LrFinderConfig::default())?;
    assert_eq!(sweep.lrs.len(), 1);
    assert!(sweep.losses[0].is_nan());
    Ok(())
}

#[test]
fn test_clip_gradients_bounds_global_norm() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let tokenizer = create_tokenizer(dir.path())?;
    let train = loader(&tokenizer, false)?;
    let trainer = tiny_trainer(load_tiny_summarizer(dir.path())?, 1e-4);

    let batch = train.batches(0).next().context("no batch")??;
    trainer.compute_loss(&batch, true)?.backward();
    let before = trainer.clip_gradients();
    assert!(before > 1e-4);

    let squared: f64 = trainer
        .summarizer()
        .vs
        .trainable_variables()
        .iter()
        .map(|v| v.grad())
        .filter(|g| g.defined())
        .map(|g| g.square().sum(tch::Kind::Float).double_value(&[]))
        .sum();
    assert!(squared.sqrt() <= 1e-4 * 1.001);
    Ok(())
}

#[test]
fn test_find_lr_restores_weights() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let tokenizer = create_tokenizer(dir.path())?;
    let train = loader(&tokenizer, true)?;
    let mut summarizer = load_tiny_summarizer(dir.path())?;
    summarizer.freeze_to(1);
    let before = snapshot(&summarizer);

    let mut trainer = tiny_trainer(summarizer, 1.0);
    let config = LrFinderConfig {
        start_lr: 1e-4,
        end_lr: 1.0,
        num_it: 6,
        ..LrFinderConfig::default()
    };
    let sweep = find_lr(&mut trainer, &train, &config)?;
    assert!(!sweep.lrs.is_empty() && sweep.lrs.len() <= 6);
    assert_eq!(sweep.lrs.len(), sweep.losses.len());
    assert!(sweep.lrs.windows(2).all(|w| w[0] < w[1]));

    let after = snapshot(trainer.summarizer());
    assert_eq!(before.len(), after.len());
    for ((name, a), (_, b)) in before.iter().zip(&after) {
        assert!(a.equal(b), "{} was not restored", name);
    }
    Ok(())
}

#[test]
fn test_export_then_reload() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let tokenizer = create_tokenizer(dir.path())?;
    let train = loader(&tokenizer, true)?;
    let valid = loader(&tokenizer, false)?;

    let mut trainer = tiny_trainer(load_tiny_summarizer(dir.path())?, 1.0);
    let stages = [Stage {
        freeze_to: None,
        epochs: 1,
        lr_max: 1e-3,
    }];
    trainer.fit_stages(&stages, &train, &valid)?;
    let (summarizer, history) = trainer.into_parts();

    let config = TrainConfig {
        stages: stages.to_vec(),
        ..TrainConfig::default()
    };
    let manifest = ArtifactManifest::new(&config, tokenizer.special_ids(), history.clone());
    let exported = artifact::export(&summarizer, &manifest, out.path())?;

    let artifact = Artifact::open(out.path())?;
    assert_eq!(artifact.files, exported.files);
    assert_eq!(artifact.manifest.history, history);
    assert_eq!(artifact.manifest.train_config.stages, stages.to_vec());
    assert_eq!(artifact.manifest.special_ids, tokenizer.special_ids());

    let reloaded = Summarizer::load(artifact.files.clone(), Device::Cpu)?;
    for ((name, a), (_, b)) in snapshot(&summarizer).iter().zip(&snapshot(&reloaded)) {
        assert!(a.equal(b), "{} differs after reload", name);
    }
    Ok(())
}
