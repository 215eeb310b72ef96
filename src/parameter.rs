//! Structures and traits that can be used to build model parameters for equations of state.

use indexmap::IndexSet;
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

/// Identifier of a pure substance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub cas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub formula: Option<String>,
}

impl Identifier {
    pub fn new(name: &str, cas: Option<&str>, formula: Option<&str>) -> Self {
        Self {
            name: name.into(),
            cas: cas.map(|s| s.into()),
            formula: formula.map(|s| s.into()),
        }
    }
}

/// A pure substance record: identifier, molar weight and model parameters.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PureRecord<M> {
    pub identifier: Identifier,
    pub molarweight: f64,
    pub model_record: M,
}

impl<M> PureRecord<M> {
    pub fn new(identifier: Identifier, molarweight: f64, model_record: M) -> Self {
        Self {
            identifier,
            molarweight,
            model_record,
        }
    }
}

/// Binary interaction parameters for a pair of identified substances.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BinaryRecord<B> {
    pub id1: String,
    pub id2: String,
    pub model_record: B,
}

/// Constructor methods for parameters.
///
/// By implementing `Parameter` for a type, you define how parameters
/// of an equation of state can be constructed from a sequence of
/// single substance records and possibly binary interaction parameters.
pub trait Parameter
where
    Self: Sized,
{
    type Pure: Clone + DeserializeOwned;
    type Binary: Clone + DeserializeOwned + Default;

    /// Creates parameters from records for pure substances and possibly binary parameters.
    fn from_records(
        pure_records: Vec<PureRecord<Self::Pure>>,
        binary_records: Array2<Self::Binary>,
    ) -> Result<Self, ParameterError>;

    /// Creates parameters from substance information stored in json files.
    ///
    /// Substances are looked up by the `name` field of their identifier and
    /// appear in the result in the order in which they were queried. Pairs
    /// without a binary record use the default interaction.
    fn from_json<P>(
        substances: &[&str],
        file_pure: P,
        file_binary: Option<P>,
    ) -> Result<Self, ParameterError>
    where
        P: AsRef<Path>,
    {
        let queried: IndexSet<String> = substances
            .iter()
            .map(|identifier| identifier.to_string())
            .collect();
        let reader = BufReader::new(File::open(file_pure)?);
        let pure_records: Vec<PureRecord<Self::Pure>> = serde_json::from_reader(reader)?;
        let mut record_map: HashMap<_, _> = pure_records
            .into_iter()
            .map(|record| (record.identifier.name.clone(), record))
            .collect();

        // Compare queried components and available components
        let available: IndexSet<String> = record_map
            .keys()
            .map(|identifier| identifier.to_string())
            .collect();
        if !queried.is_subset(&available) {
            let missing: Vec<String> = queried.difference(&available).cloned().collect();
            return Err(ParameterError::ComponentsNotFound(format!("{:?}", missing)));
        };
        let p: Vec<_> = queried
            .iter()
            .filter_map(|identifier| record_map.remove(identifier))
            .collect();

        // Read binary records from file if provided
        let binary_map: HashMap<_, _> = if let Some(path) = file_binary {
            let reader = BufReader::new(File::open(path)?);
            let binary_records: Vec<BinaryRecord<Self::Binary>> =
                serde_json::from_reader(reader)?;
            binary_records
                .into_iter()
                .map(|br| ((br.id1, br.id2), br.model_record))
                .collect()
        } else {
            HashMap::with_capacity(0)
        };

        let n = p.len();
        let br = Array2::from_shape_fn([n, n], |(i, j)| {
            let id1 = &p[i].identifier.name;
            let id2 = &p[j].identifier.name;
            binary_map
                .get(&(id1.clone(), id2.clone()))
                .or_else(|| binary_map.get(&(id2.clone(), id1.clone())))
                .cloned()
                .unwrap_or_default()
        });

        Self::from_records(p, br)
    }
}

/// Error type for incomplete parameter information and IO problems.
#[derive(Error, Debug)]
pub enum ParameterError {
    #[error(transparent)]
    FileIO(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("The following component(s) were not found: {0}")]
    ComponentsNotFound(String),
    #[error("Incompatible parameters: {0}")]
    IncompatibleParameters(String),
}
