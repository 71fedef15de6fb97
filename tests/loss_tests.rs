use anyhow::Result;
use bartsum::loss::Seq2SeqLoss;
use tch::{Kind, Tensor};

const PAD: i64 = 1;

#[test]
fn test_uniform_logits_give_log_vocab() -> Result<()> {
    let vocab = 4;
    let logits = Tensor::zeros([1, 3, vocab], (Kind::Float, tch::Device::Cpu));
    let labels = Tensor::from_slice(&[0i64, 2, PAD]).view([1, 3]);

    let loss = Seq2SeqLoss::new(PAD).compute(&logits, &labels)?;
    let expected = (vocab as f64).ln();
    assert!((loss.double_value(&[]) - expected).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_padding_does_not_change_loss() -> Result<()> {
    let logits = Tensor::from_slice(&[2.0f32, 0.5, -1.0, 0.0, 1.0, 3.0, 0.0, 0.0, 0.0])
        .view([1, 3, 3]);
    let short = Seq2SeqLoss::new(PAD)
        .compute(&logits.narrow(1, 0, 2), &Tensor::from_slice(&[0i64, 2]).view([1, 2]))?;
    let padded = Seq2SeqLoss::new(PAD)
        .compute(&logits, &Tensor::from_slice(&[0i64, 2, PAD]).view([1, 3]))?;
    assert!((short.double_value(&[]) - padded.double_value(&[])).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_loss_is_normalised_by_target_tokens() -> Result<()> {
    // Two rows with different amounts of padding; the per-token average must
    // weight every real token equally rather than every row.
    let vocab = 2;
    let mut values = vec![0.0f32; 2 * 2 * vocab as usize];
    // row 0, position 0 strongly predicts class 0 (label 0)
    values[0] = 10.0;
    let logits = Tensor::from_slice(&values).view([2, 2, vocab]);
    let labels = Tensor::from_slice(&[0i64, PAD, 0, 0]).view([2, 2]);

    let loss = Seq2SeqLoss::new(PAD).compute(&logits, &labels)?.double_value(&[]);

    let confident = (1.0 + (-10.0f64).exp()).ln();
    let uniform = 2f64.ln();
    let expected = (confident + 2.0 * uniform) / 3.0;
    assert!((loss - expected).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_all_padding_does_not_divide_by_zero() -> Result<()> {
    let logits = Tensor::zeros([1, 2, 3], (Kind::Float, tch::Device::Cpu));
    let labels = Tensor::from_slice(&[PAD, PAD]).view([1, 2]);
    let loss = Seq2SeqLoss::new(PAD).compute(&logits, &labels)?.double_value(&[]);
    assert_eq!(loss, 0.0);
    Ok(())
}
