// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Training loop: sampling, forgetting buffer, surrogate assembly, reverse
//! pass, control-variate injection, clipping, optimiser step, parameter
//! sync, and periodic metrics.

use std::collections::HashMap;

use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::control;
use crate::design::{get_dt, DesignBuilder};
use crate::error::{FitError, FitResult};
use crate::history::{ForgettingBuffer, HistoryEntry};
use crate::likelihood;
use crate::metrics::{mmd_from_features, mmd_from_gramians, MetricsFn, MetricsRecord};
use crate::mmd;
use crate::model::MmdGlm;
use crate::ops;
use crate::optim::{LrScheduler, Optimizer};
use crate::sample::Sampler;
use crate::similarity::Similarity;
use crate::tensor::Tensor;

/// Knobs of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Number of epochs to drive.
    pub num_epochs: usize,
    /// Simulated trials drawn per epoch.
    pub n_batch_fr: usize,
    /// History buffer capacity; one means no history.
    pub n_iterations_store: usize,
    /// Geometric discount per epoch of age, in (0, 1].
    pub beta: f64,
    /// Weight of the MMD surrogate in the total loss.
    pub lam_mmd: f64,
    /// Include self-pairs in the simulated-pair statistics.
    pub biased: bool,
    /// Add the data negative log-likelihood to the loss, unweighted.
    pub log_likelihood: bool,
    /// Enable the control-variate gradient correction.
    pub control_variates: bool,
    /// Per-element gradient clip threshold.
    pub clip: Option<f64>,
    /// Record metrics every this many epochs.
    pub n_metrics: usize,
    /// Emit per-epoch progress through `tracing`.
    pub verbose: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_epochs: 20,
            n_batch_fr: 100,
            n_iterations_store: 1,
            beta: 1.0,
            lam_mmd: 1.0,
            biased: false,
            log_likelihood: false,
            control_variates: false,
            clip: None,
            n_metrics: 25,
            verbose: false,
        }
    }
}

impl TrainConfig {
    pub fn with_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    pub fn with_batch(mut self, n_batch_fr: usize) -> Self {
        self.n_batch_fr = n_batch_fr;
        self
    }

    pub fn with_history(mut self, n_iterations_store: usize, beta: f64) -> Self {
        self.n_iterations_store = n_iterations_store;
        self.beta = beta;
        self
    }

    pub fn with_biased(mut self, biased: bool) -> Self {
        self.biased = biased;
        self
    }

    pub fn with_log_likelihood(mut self, enabled: bool) -> Self {
        self.log_likelihood = enabled;
        self
    }

    pub fn with_control_variates(mut self, enabled: bool) -> Self {
        self.control_variates = enabled;
        self
    }

    pub fn with_clip(mut self, clip: f64) -> Self {
        self.clip = Some(clip);
        self
    }

    pub fn with_metrics_period(mut self, n_metrics: usize) -> Self {
        self.n_metrics = n_metrics;
        self
    }
}

/// Per-run output: one total-loss value per epoch, one NLL value per epoch
/// when enabled (empty otherwise), and one series per recorded metric.
#[derive(Debug, Default)]
pub struct TrainRecord {
    pub loss: Vec<f64>,
    pub nll: Vec<f64>,
    pub metrics: HashMap<String, Vec<f64>>,
}

/// Data-side similarity statistics, fixed for the whole run.
enum DataStats {
    Features { phi_d: Array2<f64> },
    Kernel { g_dd: Array2<f64> },
}

/// Simulated-side similarity statistics, rebuilt every epoch.
enum EpochStats {
    Features { phi_fr: Array2<f64> },
    Kernel { g_ff: Array2<f64>, g_df: Array2<f64> },
}

/// Drives the fitting loop against externally supplied collaborators.
pub struct MmdTrainer<D: DesignBuilder, S: Sampler> {
    design: D,
    sampler: S,
    similarity: Similarity,
    optimizer: Box<dyn Optimizer>,
    scheduler: Option<Box<dyn LrScheduler>>,
    metrics: Option<MetricsFn>,
    config: TrainConfig,
}

impl<D: DesignBuilder, S: Sampler> MmdTrainer<D, S> {
    pub fn new(
        design: D,
        sampler: S,
        similarity: Similarity,
        optimizer: Box<dyn Optimizer>,
        config: TrainConfig,
    ) -> Self {
        Self {
            design,
            sampler,
            similarity,
            optimizer,
            scheduler: None,
            metrics: None,
            config,
        }
    }

    /// Installs a learning-rate schedule advanced after every optimiser step.
    pub fn with_scheduler(mut self, scheduler: Box<dyn LrScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Installs an external metrics callback merged into every record epoch.
    pub fn with_metrics(mut self, metrics: MetricsFn) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Runs the full loop over `num_epochs` epochs. Each epoch either fully
    /// succeeds or the run terminates; there are no retries, and non-finite
    /// values arising from degenerate configurations propagate untouched.
    pub fn fit(
        &mut self,
        model: &mut MmdGlm,
        t: &Array1<f64>,
        mask_spikes: &Array2<f64>,
        stim: Option<&Array2<f64>>,
    ) -> FitResult<TrainRecord> {
        let cfg = self.config.clone();
        if cfg.n_metrics == 0 {
            return Err(FitError::EmptyInput("metrics period"));
        }
        let dt = get_dt(t)?;

        let x_dc = if cfg.log_likelihood {
            Some(self.design.design(t, mask_spikes, stim)?)
        } else {
            None
        };
        let data_stats = match &self.similarity {
            Similarity::Features(map) => DataStats::Features {
                phi_d: map.features(t, mask_spikes)?,
            },
            Similarity::Kernel(kernel) => DataStats::Kernel {
                g_dd: kernel.gramian(t, mask_spikes, mask_spikes)?,
            },
        };

        let mut buffer = ForgettingBuffer::new(cfg.n_iterations_store, cfg.beta)?;
        let mut losses = Vec::with_capacity(cfg.num_epochs);
        let mut nll_series = Vec::new();
        let mut recorder = MetricsRecord::new();

        for epoch in 0..cfg.num_epochs {
            self.optimizer.zero_grad(model);

            // Sample at the synced parameters, then recompute design and
            // rate through the tracked pipeline: gradients flow through the
            // recomputation, never through the sampler.
            let mask_fr = self.sampler.sample(model, t, stim, cfg.n_batch_fr)?;
            if mask_fr.nrows() != t.len() || mask_fr.ncols() != cfg.n_batch_fr {
                return Err(FitError::ShapeMismatch {
                    left: vec![t.len(), cfg.n_batch_fr],
                    right: mask_fr.shape().to_vec(),
                });
            }
            let x_fr = self.design.design(t, &mask_fr, stim)?;
            let theta = model.params_tracked()?;
            let u_fr = ops::basis_response(&x_fr, &theta)?;
            let r_fr = ops::intensity(&u_fr, model.nonlinearity())?;
            buffer.push(HistoryEntry {
                rate: r_fr,
                mask: mask_fr.clone(),
            });

            let sim_mask = buffer.concat_masks()?;
            let n_total = sim_mask.ncols();
            let lp_parts = buffer
                .iter()
                .map(|entry| ops::log_proba(&entry.rate, &entry.mask, dt))
                .collect::<FitResult<Vec<Tensor>>>()?;
            let log_proba = ops::concat1d(&lp_parts)?;

            let entry_weights: Vec<f64> = (0..buffer.len()).map(|i| buffer.weight_at(i)).collect();
            let (coeffs, epoch_stats) = self.epoch_similarity(
                t,
                mask_spikes,
                &sim_mask,
                &entry_weights,
                &data_stats,
                &cfg,
                n_total,
            )?;

            let surrogate = ops::weighted_sum(&log_proba, &coeffs)?;
            let mut loss = ops::scale(&surrogate, cfg.lam_mmd)?;
            let mut epoch_nll = None;
            if let Some(x_dc) = &x_dc {
                let u_dc = ops::basis_response(x_dc, &theta)?;
                let r_dc = ops::intensity(&u_dc, model.nonlinearity())?;
                let nll = ops::spike_nll(&r_dc, mask_spikes, dt)?;
                epoch_nll = Some(nll.item());
                loss = ops::add(&loss, &nll)?;
            }

            loss.backward()?;

            if cfg.control_variates {
                let scores =
                    likelihood::score(dt, &mask_fr, &x_fr, model.theta(), model.nonlinearity());
                let (g_ff_cur, g_df_cur) =
                    current_batch_gramians(&epoch_stats, &data_stats, cfg.n_batch_fr, n_total);
                let weights = control::mmd_weights(&g_ff_cur, &g_df_cur);
                let update = control::control_variate_update(&scores, &weights);
                model.accumulate_gradients(update.view());
            }

            if let Some(limit) = cfg.clip {
                model.clip_gradients(limit);
            }

            self.optimizer.step(model)?;
            if let Some(scheduler) = self.scheduler.as_mut() {
                let lr = scheduler.step();
                self.optimizer.set_learning_rate(lr)?;
            }
            model.sync_params();

            if epoch % cfg.n_metrics == 0 {
                let mut values = match self.metrics.as_mut() {
                    Some(callback) => callback(model, t, mask_spikes, &sim_mask),
                    None => HashMap::new(),
                };
                let reference = reference_mmd(&epoch_stats, &data_stats, cfg.n_batch_fr, &cfg);
                values.insert("mmd".to_string(), reference);
                recorder.record(values);
            }

            let loss_value = loss.item();
            losses.push(loss_value);
            if let Some(nll) = epoch_nll {
                nll_series.push(nll);
            }
            if cfg.verbose {
                info!(epoch, total = cfg.num_epochs, loss = loss_value, "epoch");
            } else {
                debug!(epoch, loss = loss_value, "epoch");
            }
        }

        Ok(TrainRecord {
            loss: losses,
            nll: nll_series,
            metrics: recorder.into_series(),
        })
    }

    /// Builds the epoch's surrogate coefficient vector and the similarity
    /// statistics later stages reuse. Feature columns are discounted by the
    /// age of the minibatch they belong to; gramian mode keeps history
    /// undiscounted, matching the source estimator.
    #[allow(clippy::too_many_arguments)]
    fn epoch_similarity(
        &self,
        t: &Array1<f64>,
        mask_spikes: &Array2<f64>,
        sim_mask: &Array2<f64>,
        entry_weights: &[f64],
        data_stats: &DataStats,
        cfg: &TrainConfig,
        n_total: usize,
    ) -> FitResult<(Array1<f64>, EpochStats)> {
        match (&self.similarity, data_stats) {
            (Similarity::Features(map), DataStats::Features { phi_d }) => {
                let mut phi_fr = map.features(t, sim_mask)?;
                if phi_fr.ncols() != n_total {
                    return Err(FitError::TrialCountMismatch {
                        expected: n_total,
                        got: phi_fr.ncols(),
                    });
                }
                mmd::discount_columns(&mut phi_fr, entry_weights, cfg.n_batch_fr);
                let coeffs = if cfg.biased {
                    mmd::feature_biased(&phi_fr, phi_d)
                } else {
                    mmd::feature_unbiased(&phi_fr, phi_d, cfg.n_batch_fr)
                };
                Ok((coeffs, EpochStats::Features { phi_fr }))
            }
            (Similarity::Kernel(kernel), DataStats::Kernel { .. }) => {
                let mut g_ff = kernel.gramian(t, sim_mask, sim_mask)?;
                let g_df = kernel.gramian(t, mask_spikes, sim_mask)?;
                if g_ff.nrows() != n_total || g_ff.ncols() != n_total {
                    return Err(FitError::TrialCountMismatch {
                        expected: n_total,
                        got: g_ff.ncols(),
                    });
                }
                if !cfg.biased {
                    mmd::zero_diagonal(&mut g_ff);
                }
                let coeffs = if cfg.biased {
                    mmd::kernel_biased(&g_ff, &g_df)
                } else {
                    mmd::kernel_unbiased(&g_ff, &g_df, cfg.n_batch_fr)
                };
                Ok((coeffs, EpochStats::Kernel { g_ff, g_df }))
            }
            _ => unreachable!("data statistics always match the similarity mode"),
        }
    }
}

/// Gramians restricted to the newest minibatch, for the control-variate
/// weights. The newest feature block carries unit discount, so slicing the
/// trailing columns recovers the undiscounted features.
fn current_batch_gramians(
    epoch_stats: &EpochStats,
    data_stats: &DataStats,
    n_batch: usize,
    n_total: usize,
) -> (Array2<f64>, Array2<f64>) {
    let start = n_total - n_batch;
    match (epoch_stats, data_stats) {
        (EpochStats::Features { phi_fr }, DataStats::Features { phi_d }) => {
            let phi_cur = phi_fr.slice(s![.., start..]).to_owned();
            let g_ff = phi_cur.t().dot(&phi_cur);
            let g_df = phi_d.t().dot(&phi_cur);
            (g_ff, g_df)
        }
        (EpochStats::Kernel { g_ff, g_df }, _) => (
            g_ff.slice(s![start.., start..]).to_owned(),
            g_df.slice(s![.., start..]).to_owned(),
        ),
        _ => unreachable!("data statistics always match the similarity mode"),
    }
}

/// Reference MMD for the metrics record, matching the estimator variant. The
/// feature path evaluates the newest minibatch only.
fn reference_mmd(
    epoch_stats: &EpochStats,
    data_stats: &DataStats,
    n_batch: usize,
    cfg: &TrainConfig,
) -> f64 {
    match (epoch_stats, data_stats) {
        (EpochStats::Features { phi_fr }, DataStats::Features { phi_d }) => {
            let start = phi_fr.ncols() - n_batch;
            let phi_cur = phi_fr.slice(s![.., start..]).to_owned();
            mmd_from_features(phi_d, &phi_cur, cfg.biased)
        }
        (EpochStats::Kernel { g_ff, g_df }, DataStats::Kernel { g_dd }) => {
            mmd_from_gramians(g_dd, g_ff, g_df, cfg.biased)
        }
        _ => unreachable!("data statistics always match the similarity mode"),
    }
}
