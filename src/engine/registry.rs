//! Ordered registry of (model, optimizer, scheduler) units

use crate::model::{Mode, Model};
use crate::optim::Optimizer;
use crate::sched::Scheduler;
use crate::{Error, Result};

/// Name given to the first-registered (main) model
pub const MAIN_MODEL_NAME: &str = "main_model";

/// One registered training unit: a model with its optimizer and scheduler
pub struct RegisteredUnit {
    pub name: String,
    pub model: Box<dyn Model>,
    pub optimizer: Box<dyn Optimizer>,
    pub scheduler: Box<dyn Scheduler>,
}

/// Ordered collection of registered units.
///
/// The first unit is always the main model; any others are auxiliary models
/// used for mutual-learning style training. Names are unique.
#[derive(Default)]
pub struct ModelRegistry {
    units: Vec<RegisteredUnit>,
}

impl ModelRegistry {
    /// Registry with a single main model
    pub fn single(
        model: Box<dyn Model>,
        optimizer: Box<dyn Optimizer>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        let mut registry = Self::default();
        // a single unit can never collide on name
        let _ = registry.register(MAIN_MODEL_NAME, model, optimizer, scheduler);
        registry
    }

    /// Registry from parallel lists; the first entry becomes the main model
    /// and the rest are named `aux_model_1`, `aux_model_2`, ...
    ///
    /// Mismatched list lengths are a configuration error.
    pub fn from_triples(
        models: Vec<Box<dyn Model>>,
        optimizers: Vec<Box<dyn Optimizer>>,
        schedulers: Vec<Box<dyn Scheduler>>,
    ) -> Result<Self> {
        if models.len() != optimizers.len() || models.len() != schedulers.len() {
            return Err(Error::Configuration(format!(
                "mismatched registry lists: {} models, {} optimizers, {} schedulers",
                models.len(),
                optimizers.len(),
                schedulers.len()
            )));
        }
        let mut registry = Self::default();
        for (id, ((model, optimizer), scheduler)) in models
            .into_iter()
            .zip(optimizers)
            .zip(schedulers)
            .enumerate()
        {
            let name = if id == 0 {
                MAIN_MODEL_NAME.to_string()
            } else {
                format!("aux_model_{id}")
            };
            registry.register(&name, model, optimizer, scheduler)?;
        }
        Ok(registry)
    }

    /// Add a unit under `name`. Duplicate names are a configuration error.
    pub fn register(
        &mut self,
        name: &str,
        model: Box<dyn Model>,
        optimizer: Box<dyn Optimizer>,
        scheduler: Box<dyn Scheduler>,
    ) -> Result<()> {
        if self.units.iter().any(|u| u.name == name) {
            return Err(Error::Configuration(format!(
                "model '{name}' is already registered"
            )));
        }
        self.units.push(RegisteredUnit {
            name: name.to_string(),
            model,
            optimizer,
            scheduler,
        });
        Ok(())
    }

    /// All registered names in insertion order, or a validated subset
    pub fn get_names(&self, subset: Option<&[&str]>) -> Result<Vec<String>> {
        match subset {
            None => Ok(self.units.iter().map(|u| u.name.clone()).collect()),
            Some(names) => {
                for name in names {
                    if !self.units.iter().any(|u| u.name == *name) {
                        return Err(Error::UnknownModel((*name).to_string()));
                    }
                }
                Ok(names.iter().map(|n| (*n).to_string()).collect())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The main (first-registered) unit
    pub fn main(&self) -> &RegisteredUnit {
        &self.units[0]
    }

    pub fn main_mut(&mut self) -> &mut RegisteredUnit {
        &mut self.units[0]
    }

    pub fn unit(&self, idx: usize) -> &RegisteredUnit {
        &self.units[idx]
    }

    pub fn unit_mut(&mut self, idx: usize) -> &mut RegisteredUnit {
        &mut self.units[idx]
    }

    /// Look a unit up by name
    pub fn by_name_mut(&mut self, name: &str) -> Result<&mut RegisteredUnit> {
        self.units
            .iter_mut()
            .find(|u| u.name == name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn units(&self) -> impl Iterator<Item = &RegisteredUnit> {
        self.units.iter()
    }

    pub fn units_mut(&mut self) -> impl Iterator<Item = &mut RegisteredUnit> {
        self.units.iter_mut()
    }

    /// Names of the auxiliary (non-main) models
    pub fn aux_names(&self) -> Vec<String> {
        self.units.iter().skip(1).map(|u| u.name.clone()).collect()
    }

    /// Switch every registered model between train and eval mode
    pub fn set_mode_all(&mut self, mode: Mode) {
        for unit in &mut self.units {
            unit.model.set_mode(mode);
        }
    }
}
