//! Text products written after each cycle.

use clap::ValueEnum;
use nd::{ArrayView, Axis, Ix4};

use na_core::CycleTime;
use na_df::{CycleOutcome, FitStatistics, StageReport};

use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputProduct {
  PriorMean,
  PosteriorMean,
  Spread,
  StageStatistics,
}

impl OutputProduct {
  pub fn name(&self) -> &'static str {
    match self {
      &OutputProduct::PriorMean => "prior_mean",
      &OutputProduct::PosteriorMean => "posterior_mean",
      &OutputProduct::Spread => "spread",
      &OutputProduct::StageStatistics => "stage_statistics",
    }
  }

  pub fn emit<W: Write>(&self, out: &mut W, time: CycleTime,
                        outcome: &CycleOutcome) -> io::Result<()> {
    let d = &outcome.diagnostics;
    match self {
      &OutputProduct::PriorMean => field_summary(out, self.name(), time, d.prior_mean.view()),
      &OutputProduct::PosteriorMean => field_summary(out, self.name(), time,
                                                     d.posterior_mean.view()),
      &OutputProduct::Spread => spread(out, time, d.prior_spread.view(),
                                       d.posterior_spread.view()),
      &OutputProduct::StageStatistics => stage_statistics(out, time, &outcome.stages[..]),
    }
  }
}

/// Min, mean and max over the horizontal, per species and level.
fn field_summary<W: Write>(out: &mut W, name: &str, time: CycleTime,
                           field: ArrayView<f64, Ix4>) -> io::Result<()> {
  for (s, species) in field.axis_iter(Axis(0)).enumerate() {
    for (l, level) in species.axis_iter(Axis(0)).enumerate() {
      let min = level.fold(::std::f64::INFINITY, |m, &v| m.min(v) );
      let max = level.fold(::std::f64::NEG_INFINITY, |m, &v| m.max(v) );
      let mean = level.mean().unwrap_or(::std::f64::NAN);
      writeln!(out, "{} t={} species={} level={} min={:.4} mean={:.4} max={:.4}",
               name, time, s, l, min, mean, max)?;
    }
  }
  Ok(())
}

fn spread<W: Write>(out: &mut W, time: CycleTime, prior: ArrayView<f64, Ix4>,
                    posterior: ArrayView<f64, Ix4>) -> io::Result<()> {
  let levels = prior.len_of(Axis(1));
  for l in 0..levels {
    let before = prior.index_axis(Axis(1), l).mean().unwrap_or(::std::f64::NAN);
    let after = posterior.index_axis(Axis(1), l).mean().unwrap_or(::std::f64::NAN);
    writeln!(out, "spread t={} level={} prior={:.4} posterior={:.4}",
             time, l, before, after)?;
  }
  Ok(())
}

fn fit(stats: Option<FitStatistics>) -> String {
  match stats {
    Some(s) => format!("rmse={:.4} nmb={:.4}", s.rmse, s.nmb),
    None => "rmse=- nmb=-".to_string(),
  }
}

fn stage_statistics<W: Write>(out: &mut W, time: CycleTime,
                              stages: &[StageReport]) -> io::Result<()> {
  for stage in stages.iter() {
    writeln!(out, "stage t={} name={} reduction={:?} m={} status=\"{}\" prior[{}] posterior[{}]{}",
             time, stage.name, stage.reduction, stage.observations, stage.status,
             fit(stage.prior), fit(stage.posterior),
             if stage.rank_deficient { " rank_deficient" } else { "" })?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use na_core::Grid;
  use na_df::{Diagnostics, EnsembleField, Reduction, StageStatus};
  use nd::Array;

  fn outcome() -> CycleOutcome {
    let g = Grid::regular(0.0, 1.0, 2, 0.0, 1.0, 2, 1, 2).unwrap();
    let mut mean = Array::from_elem(g.field_shape(), 2.0);
    mean[[0, 1, 1, 1]] = 6.0;
    CycleOutcome {
      posterior: EnsembleField::zeros(&g, 2),
      diagnostics: Diagnostics {
        prior_mean: Array::from_elem(g.field_shape(), 1.0),
        posterior_mean: mean,
        prior_spread: Array::from_elem(g.field_shape(), 0.5),
        posterior_spread: Array::from_elem(g.field_shape(), 0.25),
      },
      stages: vec![
        StageReport {
          name: "ground".into(),
          reduction: Reduction::Surface,
          status: StageStatus::Applied,
          observations: 2,
          rank_deficient: true,
          prior: Some(FitStatistics { rmse: 3.0, nmb: -0.5, count: 2 }),
          posterior: Some(FitStatistics { rmse: 1.0, nmb: -0.25, count: 2 }),
        },
        StageReport {
          name: "satellite".into(),
          reduction: Reduction::Column,
          status: StageStatus::Failed("innovation covariance is not SPD".into()),
          observations: 7,
          rank_deficient: false,
          prior: None,
          posterior: None,
        },
      ],
    }
  }

  fn render(p: OutputProduct) -> String {
    let mut out = Vec::new();
    p.emit(&mut out, 3600, &outcome()).unwrap();
    String::from_utf8(out).unwrap()
  }

  #[test]
  fn mean_summary_per_level() {
    let text = render(OutputProduct::PosteriorMean);
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1],
               "posterior_mean t=3600 species=0 level=1 min=2.0000 mean=3.0000 max=6.0000");
    assert!(render(OutputProduct::PriorMean).starts_with("prior_mean t=3600 species=0 level=0"));
  }

  #[test]
  fn spread_per_level() {
    let text = render(OutputProduct::Spread);
    assert_eq!(text.lines().next(),
               Some("spread t=3600 level=0 prior=0.5000 posterior=0.2500"));
  }

  #[test]
  fn stage_rows() {
    let text = render(OutputProduct::StageStatistics);
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("prior[rmse=3.0000 nmb=-0.5000]"));
    assert!(lines[0].ends_with("rank_deficient"));
    assert!(lines[1].contains("status=\"failed: innovation covariance is not SPD\""));
    assert!(lines[1].contains("prior[rmse=- nmb=-]"));
  }
}
