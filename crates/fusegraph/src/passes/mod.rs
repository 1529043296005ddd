//! Graph rewrite passes.

mod mean_stddev_normalization;

pub use mean_stddev_normalization::{
    fuse_mean_stddev_normalization, MeanStdDevNormalizationFusion,
};

pub use crate::optimizer::{GraphPass, PassResult};
