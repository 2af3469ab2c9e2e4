#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;

extern crate num;

mod error;
pub use error::{HomologyError, Result};

pub mod utils;

pub mod arbor;
pub use arbor::Arbor;

pub mod skeleton;
pub use skeleton::{ConnectorRelation, SkeletonResponse};

pub mod neuron;
pub use neuron::{Neuron, NeuronList};

pub mod source;
pub use source::{ConnectionType, InMemorySource, NeuronSource};

pub mod config;
pub use config::{AnalysisConfig, NblastParams, PartnerParams};

pub mod score;
pub use score::ScoreMatrixLookup;

pub mod dotprop;
pub use dotprop::Dotprops;

pub mod nblast;

pub mod matching;
pub use matching::SimilarityMatrix;

pub mod likelihood;
pub use likelihood::{ConnStats, MorphoStats};

pub mod connectivity;
pub use connectivity::PairMap;

pub mod transform;

pub mod homology;

pub mod analysis;
pub use analysis::HomologyPairs;
