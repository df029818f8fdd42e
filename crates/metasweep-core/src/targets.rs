//! Built-in targets: the tasks, models, datasets and losses the shipped
//! configs refer to, plus pass-through trainer/logger/callback targets.
//!
//! Components only validate and carry their arguments; the training entry
//! point that consumes a job config does the real construction.

use crate::error::ConfigResult;
use crate::registry::{Arguments, Component, TargetRegistry};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::any::Any;

pub const META_OPTIMIZER_EXPLICIT: &str = "tasks.meta_optimizer.MetaOptimizerExplicitForRegression";
pub const META_OPTIMIZER_IMPLICIT: &str = "tasks.meta_optimizer.MetaOptimizerImplicitForRegression";
pub const SGD_BASELINE: &str = "tasks.sgd.SGDBaselineForRegression";
pub const TRANSFORMER_AGGREGATOR: &str = "models.context_aggregator.TransformerContextAggregator";
pub const MEAN_AGGREGATOR: &str = "models.context_aggregator.MeanContextAggregator";
pub const MLP_PREDICTOR: &str = "models.predictor.MLPConcatPredictor";
pub const DECODER_TRANSFORMER: &str = "models.implicit.DecoderTransformer";
pub const LINEAR_DATASET: &str = "datasets.regression.LinearRegressionDataset";
pub const SINUSOID_DATASET: &str = "datasets.regression.SinusoidRegressionDataset";
pub const ICL_DATAMODULE: &str = "datasets.datamodule.ICLDataModule";
pub const MSE_LOSS: &str = "torch.nn.MSELoss";
pub const L1_LOSS: &str = "torch.nn.L1Loss";
pub const HUBER_LOSS: &str = "torch.nn.HuberLoss";

/// Targets whose arguments belong to the training framework.
pub const PASSTHROUGH_TARGETS: [&str; 8] = [
    "lightning.Trainer",
    "lightning.pytorch.loggers.CSVLogger",
    "lightning.pytorch.loggers.WandbLogger",
    "lightning.pytorch.loggers.TensorBoardLogger",
    "lightning.pytorch.callbacks.ModelCheckpoint",
    "lightning.pytorch.callbacks.EarlyStopping",
    "lightning.pytorch.callbacks.LearningRateMonitor",
    "lightning.pytorch.callbacks.RichProgressBar",
];

const DEFAULT_PROBE_POINTS: [usize; 4] = [1, 4, 10, 50];

macro_rules! impl_component {
    ($ty:ty) => {
        impl Component for $ty {
            fn target(&self) -> &str {
                &self.target
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaObjective {
    Train,
    Prequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Mean,
    Sum,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossFn {
    pub target: String,
    pub reduction: Reduction,
    /// Huber threshold; only for `HuberLoss`.
    pub delta: Option<f64>,
}
impl_component!(LossFn);

impl LossFn {
    /// Per-sample MSE, the default for regression tasks.
    #[must_use]
    pub fn mse_unreduced() -> Self {
        Self { target: MSE_LOSS.to_string(), reduction: Reduction::None, delta: None }
    }

    fn build(args: &mut Arguments<'_>) -> ConfigResult<Self> {
        let reduction = args.get_or("reduction", Reduction::Mean)?;
        let delta = if args.target() == HUBER_LOSS {
            let delta: f64 = args.get_or("delta", 1.0)?;
            if !(delta > 0.0) {
                return Err(args.invalid("'delta' must be positive"));
            }
            Some(delta)
        } else {
            None
        };
        Ok(Self { target: args.target().to_string(), reduction, delta })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextAggregator {
    pub target: String,
    pub x_dim: usize,
    pub y_dim: usize,
    pub z_dim: usize,
    pub hidden_dim: usize,
    /// Transformer depth; `None` for the mean aggregator.
    pub n_layers: Option<usize>,
    pub n_heads: Option<usize>,
    pub dropout: f64,
}
impl_component!(ContextAggregator);

impl ContextAggregator {
    fn build(args: &mut Arguments<'_>) -> ConfigResult<Self> {
        let x_dim = positive(args, "x_dim", None)?;
        let y_dim = positive(args, "y_dim", None)?;
        let z_dim = positive(args, "z_dim", None)?;
        let hidden_dim = positive(args, "hidden_dim", Some(z_dim))?;
        let (n_layers, n_heads, dropout) = if args.target() == TRANSFORMER_AGGREGATOR {
            let n_layers = positive(args, "n_layers", Some(4))?;
            let n_heads = positive(args, "n_heads", Some(4))?;
            if hidden_dim % n_heads != 0 {
                return Err(args.invalid(format!("hidden_dim {hidden_dim} is not divisible by n_heads {n_heads}")));
            }
            (Some(n_layers), Some(n_heads), probability(args, "dropout")?)
        } else {
            (None, None, 0.0)
        };
        Ok(Self { target: args.target().to_string(), x_dim, y_dim, z_dim, hidden_dim, n_layers, n_heads, dropout })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predictor {
    pub target: String,
    pub x_dim: usize,
    pub y_dim: usize,
    /// Context dimension; `None` when the predictor sees no context.
    pub z_dim: Option<usize>,
    pub hidden_dim: usize,
    pub n_layers: usize,
}
impl_component!(Predictor);

impl Predictor {
    fn build(args: &mut Arguments<'_>) -> ConfigResult<Self> {
        let x_dim = positive(args, "x_dim", None)?;
        let y_dim = positive(args, "y_dim", None)?;
        let z_dim = args.optional::<usize>("z_dim")?;
        if z_dim == Some(0) {
            return Err(args.invalid("'z_dim' must be at least 1"));
        }
        let hidden_dim = positive(args, "hidden_dim", Some(128))?;
        let n_layers = positive(args, "n_layers", Some(2))?;
        Ok(Self { target: args.target().to_string(), x_dim, y_dim, z_dim, hidden_dim, n_layers })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecoderTransformer {
    pub target: String,
    pub x_dim: usize,
    pub y_dim: usize,
    pub d_model: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub dropout: f64,
}
impl_component!(DecoderTransformer);

impl DecoderTransformer {
    fn build(args: &mut Arguments<'_>) -> ConfigResult<Self> {
        let x_dim = positive(args, "x_dim", None)?;
        let y_dim = positive(args, "y_dim", None)?;
        let d_model = positive(args, "d_model", Some(128))?;
        let n_layers = positive(args, "n_layers", Some(4))?;
        let n_heads = positive(args, "n_heads", Some(4))?;
        if d_model % n_heads != 0 {
            return Err(args.invalid(format!("d_model {d_model} is not divisible by n_heads {n_heads}")));
        }
        let dropout = probability(args, "dropout")?;
        Ok(Self { target: args.target().to_string(), x_dim, y_dim, d_model, n_layers, n_heads, dropout })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionDataset {
    pub target: String,
    pub x_dim: usize,
    pub y_dim: usize,
    pub n_tasks: usize,
    pub n_samples: usize,
    pub noise: f64,
    /// Sinusoid only.
    pub amplitude_range: Option<[f64; 2]>,
    /// Sinusoid only.
    pub phase_range: Option<[f64; 2]>,
}
impl_component!(RegressionDataset);

impl RegressionDataset {
    fn build(args: &mut Arguments<'_>) -> ConfigResult<Self> {
        let x_dim = positive(args, "x_dim", Some(1))?;
        let y_dim = positive(args, "y_dim", Some(1))?;
        let n_tasks = positive(args, "n_tasks", None)?;
        let n_samples = positive(args, "n_samples", None)?;
        let noise: f64 = args.get_or("noise", 0.0)?;
        if !(noise >= 0.0) {
            return Err(args.invalid("'noise' must be non-negative"));
        }
        let (amplitude_range, phase_range) = if args.target() == SINUSOID_DATASET {
            let amplitude = interval(args, "amplitude_range", [0.1, 5.0])?;
            let phase = interval(args, "phase_range", [0.0, std::f64::consts::PI])?;
            (Some(amplitude), Some(phase))
        } else {
            (None, None)
        };
        Ok(Self { target: args.target().to_string(), x_dim, y_dim, n_tasks, n_samples, noise, amplitude_range, phase_range })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataModule {
    pub target: String,
    pub train_dataset: RegressionDataset,
    pub val_dataset: Option<RegressionDataset>,
    pub batch_size: usize,
    pub num_workers: usize,
}
impl_component!(DataModule);

impl DataModule {
    fn build(args: &mut Arguments<'_>) -> ConfigResult<Self> {
        let train_dataset: RegressionDataset = typed(args, "train_dataset", "regression dataset")?;
        let val_dataset = match args.optional_component("val_dataset")? {
            None => None,
            Some(component) => Some(
                component
                    .downcast_ref::<RegressionDataset>()
                    .cloned()
                    .ok_or_else(|| args.invalid("'val_dataset' must be a regression dataset"))?,
            ),
        };
        if let Some(val) = &val_dataset {
            if (val.x_dim, val.y_dim) != (train_dataset.x_dim, train_dataset.y_dim) {
                return Err(args.invalid("train and validation datasets have different dimensions"));
            }
        }
        let batch_size = positive(args, "batch_size", Some(128))?;
        let num_workers = args.get_or("num_workers", 0)?;
        Ok(Self { target: args.target().to_string(), train_dataset, val_dataset, batch_size, num_workers })
    }
}

/// Meta-optimisation with an explicit context aggregator and predictor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaOptimizerExplicit {
    pub target: String,
    pub meta_objective: MetaObjective,
    pub context_aggregator: ContextAggregator,
    pub predictor: Predictor,
    pub min_train_samples: usize,
    pub lr: f64,
    pub loss_fn: LossFn,
    pub n_probe_tasks: usize,
    pub probe_n_context_points: Vec<usize>,
    pub probe_resolution: usize,
}
impl_component!(MetaOptimizerExplicit);

impl MetaOptimizerExplicit {
    fn build(args: &mut Arguments<'_>) -> ConfigResult<Self> {
        let meta_objective = args.required("meta_objective")?;
        let context_aggregator: ContextAggregator = typed(args, "context_aggregator", "context aggregator")?;
        let predictor: Predictor = typed(args, "predictor", "predictor")?;
        if let Some(z_dim) = predictor.z_dim {
            if z_dim != context_aggregator.z_dim {
                return Err(args.invalid(format!(
                    "predictor z_dim {z_dim} does not match context_aggregator z_dim {}",
                    context_aggregator.z_dim
                )));
            }
        }
        if (predictor.x_dim, predictor.y_dim) != (context_aggregator.x_dim, context_aggregator.y_dim) {
            return Err(args.invalid("predictor and context_aggregator have different x_dim/y_dim"));
        }
        let min_train_samples = positive(args, "min_train_samples", Some(1))?;
        let lr = learning_rate(args, 1e-3)?;
        let loss_fn = loss(args)?;
        let n_probe_tasks = args.get_or("n_probe_tasks", 4)?;
        let probe_n_context_points: Vec<usize> = args.get_or("probe_n_context_points", DEFAULT_PROBE_POINTS.to_vec())?;
        if probe_n_context_points.contains(&0) {
            return Err(args.invalid("'probe_n_context_points' entries must be at least 1"));
        }
        let probe_resolution = positive(args, "probe_resolution", Some(100))?;
        Ok(Self {
            target: args.target().to_string(),
            meta_objective,
            context_aggregator,
            predictor,
            min_train_samples,
            lr,
            loss_fn,
            n_probe_tasks,
            probe_n_context_points,
            probe_resolution,
        })
    }
}

/// Meta-optimisation of a single decoder that reads the context in-sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaOptimizerImplicit {
    pub target: String,
    pub meta_objective: MetaObjective,
    pub model: DecoderTransformer,
    pub min_train_samples: usize,
    pub lr: f64,
    pub loss_fn: LossFn,
}
impl_component!(MetaOptimizerImplicit);

impl MetaOptimizerImplicit {
    fn build(args: &mut Arguments<'_>) -> ConfigResult<Self> {
        let meta_objective = args.required("meta_objective")?;
        let model = typed(args, "model", "decoder transformer")?;
        let min_train_samples = positive(args, "min_train_samples", Some(1))?;
        let lr = learning_rate(args, 1e-4)?;
        let loss_fn = loss(args)?;
        Ok(Self { target: args.target().to_string(), meta_objective, model, min_train_samples, lr, loss_fn })
    }
}

/// Per-task gradient descent from scratch, the non-meta-learned baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SgdBaseline {
    pub target: String,
    pub predictor: Predictor,
    pub lr: f64,
    pub n_steps: usize,
    pub min_train_samples: usize,
    pub loss_fn: LossFn,
}
impl_component!(SgdBaseline);

impl SgdBaseline {
    fn build(args: &mut Arguments<'_>) -> ConfigResult<Self> {
        let predictor: Predictor = typed(args, "predictor", "predictor")?;
        let lr = learning_rate(args, 1e-2)?;
        let n_steps = positive(args, "n_steps", Some(100))?;
        let min_train_samples = positive(args, "min_train_samples", Some(1))?;
        let loss_fn = loss(args)?;
        Ok(Self { target: args.target().to_string(), predictor, lr, n_steps, min_train_samples, loss_fn })
    }
}

/// A framework object whose arguments are carried through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct External {
    pub target: String,
    pub kwargs: Mapping,
}
impl_component!(External);

/// Register every built-in target.
pub fn register_builtins(registry: &mut TargetRegistry) -> ConfigResult<()> {
    registry.register(META_OPTIMIZER_EXPLICIT, |a| Ok(Box::new(MetaOptimizerExplicit::build(a)?)))?;
    registry.register(META_OPTIMIZER_IMPLICIT, |a| Ok(Box::new(MetaOptimizerImplicit::build(a)?)))?;
    registry.register(SGD_BASELINE, |a| Ok(Box::new(SgdBaseline::build(a)?)))?;
    for name in [TRANSFORMER_AGGREGATOR, MEAN_AGGREGATOR] {
        registry.register(name, |a| Ok(Box::new(ContextAggregator::build(a)?)))?;
    }
    registry.register(MLP_PREDICTOR, |a| Ok(Box::new(Predictor::build(a)?)))?;
    registry.register(DECODER_TRANSFORMER, |a| Ok(Box::new(DecoderTransformer::build(a)?)))?;
    for name in [LINEAR_DATASET, SINUSOID_DATASET] {
        registry.register(name, |a| Ok(Box::new(RegressionDataset::build(a)?)))?;
    }
    registry.register(ICL_DATAMODULE, |a| Ok(Box::new(DataModule::build(a)?)))?;
    for name in [MSE_LOSS, L1_LOSS, HUBER_LOSS] {
        registry.register(name, |a| Ok(Box::new(LossFn::build(a)?)))?;
    }
    for name in PASSTHROUGH_TARGETS {
        registry.register(name, |a| Ok(Box::new(External { target: a.target().to_string(), kwargs: a.rest()? })))?;
    }
    Ok(())
}

/// Instantiate a nested argument and require a concrete component type.
fn typed<T: Component + Clone + 'static>(args: &mut Arguments<'_>, name: &str, expected: &str) -> ConfigResult<T> {
    let component = args.component(name)?;
    component
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| args.invalid(format!("'{name}' must be a {expected}, got '{}'", component.target())))
}

fn positive(args: &mut Arguments<'_>, name: &str, default: Option<usize>) -> ConfigResult<usize> {
    let value = match default {
        Some(default) => args.get_or(name, default)?,
        None => args.required(name)?,
    };
    if value == 0 {
        return Err(args.invalid(format!("'{name}' must be at least 1")));
    }
    Ok(value)
}

fn probability(args: &mut Arguments<'_>, name: &str) -> ConfigResult<f64> {
    let value: f64 = args.get_or(name, 0.0)?;
    if !(0.0..1.0).contains(&value) {
        return Err(args.invalid(format!("'{name}' must be in [0, 1)")));
    }
    Ok(value)
}

fn learning_rate(args: &mut Arguments<'_>, default: f64) -> ConfigResult<f64> {
    let lr: f64 = args.get_or("lr", default)?;
    if !(lr > 0.0 && lr.is_finite()) {
        return Err(args.invalid("'lr' must be a positive number"));
    }
    Ok(lr)
}

fn interval(args: &mut Arguments<'_>, name: &str, default: [f64; 2]) -> ConfigResult<[f64; 2]> {
    let [low, high]: [f64; 2] = args.get_or(name, default)?;
    if low > high {
        return Err(args.invalid(format!("'{name}' lower bound exceeds upper bound")));
    }
    Ok([low, high])
}

fn loss(args: &mut Arguments<'_>) -> ConfigResult<LossFn> {
    match args.optional_component("loss_fn")? {
        None => Ok(LossFn::mse_unreduced()),
        Some(component) => component
            .downcast_ref::<LossFn>()
            .cloned()
            .ok_or_else(|| args.invalid(format!("'loss_fn' must be a loss, got '{}'", component.target()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::node::ConfigNode;

    const EXPLICIT: &str = r"
_target_: tasks.meta_optimizer.MetaOptimizerExplicitForRegression
meta_objective: prequential
context_aggregator:
  _target_: models.context_aggregator.TransformerContextAggregator
  x_dim: 1
  y_dim: 1
  z_dim: 64
predictor:
  _target_: models.predictor.MLPConcatPredictor
  x_dim: 1
  y_dim: 1
  z_dim: 64
";

    fn build(yaml: &str) -> ConfigResult<Box<dyn Component>> {
        TargetRegistry::with_builtins().unwrap().instantiate(&ConfigNode::parse_yaml(yaml).unwrap())
    }

    #[test]
    fn test_explicit_task_defaults() {
        let component = build(EXPLICIT).unwrap();
        let task = component.downcast_ref::<MetaOptimizerExplicit>().unwrap();
        assert_eq!(task.meta_objective, MetaObjective::Prequential);
        assert_eq!(task.min_train_samples, 1);
        assert!((task.lr - 1e-3).abs() < f64::EPSILON);
        assert_eq!(task.loss_fn, LossFn::mse_unreduced());
        assert_eq!(task.n_probe_tasks, 4);
        assert_eq!(task.probe_n_context_points, vec![1, 4, 10, 50]);
        assert_eq!(task.probe_resolution, 100);
    }

    #[test]
    fn test_meta_objective_is_validated() {
        let yaml = EXPLICIT.replace("prequential", "online");
        assert!(matches!(build(&yaml), Err(ConfigError::InvalidArgument { .. })));
    }

    #[test]
    fn test_z_dim_mismatch() {
        let yaml = EXPLICIT.replacen("z_dim: 64", "z_dim: 32", 1);
        let err = build(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgument { ref message, .. } if message.contains("z_dim")));
    }

    #[test]
    fn test_wrong_component_kind() {
        let yaml = EXPLICIT.replace("models.predictor.MLPConcatPredictor", "torch.nn.MSELoss");
        // The loss rejects the predictor's dimension arguments first.
        assert!(matches!(build(&yaml), Err(ConfigError::InvalidArgument { .. })));
    }

    #[test]
    fn test_loss_variants() {
        let huber = build("_target_: torch.nn.HuberLoss\ndelta: 0.5\n").unwrap();
        assert_eq!(huber.downcast_ref::<LossFn>().and_then(|l| l.delta), Some(0.5));
        assert!(build("_target_: torch.nn.L1Loss\ndelta: 0.5\n").is_err());
        assert!(build("_target_: torch.nn.MSELoss\nreduction: median\n").is_err());
    }

    #[test]
    fn test_passthrough_validates_nested_targets() {
        let ok = "_target_: lightning.Trainer\nmax_epochs: 10\ncallbacks:\n  - _target_: lightning.pytorch.callbacks.RichProgressBar\n";
        assert!(build(ok).is_ok());
        let bad = "_target_: lightning.Trainer\ncallbacks:\n  - _target_: my.custom.Callback\n";
        assert!(matches!(build(bad), Err(ConfigError::UnknownTarget { ref path, .. }) if path == "callbacks.0"));
    }

    #[test]
    fn test_datamodule_requires_dataset() {
        let yaml = "_target_: datasets.datamodule.ICLDataModule\ntrain_dataset:\n  _target_: datasets.regression.SinusoidRegressionDataset\n  n_tasks: 100\n  n_samples: 64\n";
        let component = build(yaml).unwrap();
        let dm = component.downcast_ref::<DataModule>().unwrap();
        assert_eq!(dm.batch_size, 128);
        assert_eq!(dm.train_dataset.amplitude_range, Some([0.1, 5.0]));
    }
}
