//! # Controller Registry
//!
//! Maps controller type names to wire tags and factories.
//!
//! The registry is an ordinary value built at start-up and shared by the
//! cells of a process. Type IDs are assigned in registration order, so
//! every process of a space must register the same types in the same
//! order; [`ControllerRegistry::with_builtin_types`] does that for the
//! built-in ones.

use std::collections::HashMap;

use tracing::debug;

use super::{
    Controller, ControllerDomain, ControllerTypeId, MoveToPointController, ProximityController,
    TimerController,
};
use crate::error::{CellError, CellResult};

/// Creates a fresh, unattached controller of one type.
pub type ControllerFactory = fn() -> Box<dyn Controller>;

/// A registered controller type.
#[derive(Clone, Debug)]
pub struct ControllerInfo {
    /// Wire tag.
    pub type_id: ControllerTypeId,
    /// Registered name.
    pub name: &'static str,
    /// Domain every instance runs in.
    pub domain: ControllerDomain,
    factory: ControllerFactory,
}

/// Registered controller types.
#[derive(Default)]
pub struct ControllerRegistry {
    types: Vec<ControllerInfo>,
    by_name: HashMap<&'static str, ControllerTypeId>,
}

impl ControllerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in controller types.
    #[must_use]
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        let builtins: [(&'static str, ControllerDomain, ControllerFactory); 3] = [
            (TimerController::TYPE_NAME, ControllerDomain::REAL, new_timer),
            (ProximityController::TYPE_NAME, ControllerDomain::REAL, new_proximity),
            (MoveToPointController::TYPE_NAME, ControllerDomain::REAL, new_move_to_point),
        ];
        for (name, domain, factory) in builtins {
            registry
                .register(name, domain, factory)
                .expect("built-in controller names are distinct");
        }
        registry
    }

    /// Registers a controller type.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::DuplicateControllerType`] if the name is taken.
    pub fn register(
        &mut self,
        name: &'static str,
        domain: ControllerDomain,
        factory: ControllerFactory,
    ) -> CellResult<ControllerTypeId> {
        if self.by_name.contains_key(name) {
            return Err(CellError::DuplicateControllerType(name));
        }
        let index = u16::try_from(self.types.len())
            .map_err(|_| CellError::InvalidArgument("too many controller types"))?;
        let type_id = ControllerTypeId(index);

        self.types.push(ControllerInfo {
            type_id,
            name,
            domain,
            factory,
        });
        self.by_name.insert(name, type_id);
        debug!(name, type_id = index, "registered controller type");
        Ok(type_id)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Type ID of a registered name.
    #[must_use]
    pub fn type_id(&self, name: &str) -> Option<ControllerTypeId> {
        self.by_name.get(name).copied()
    }

    /// Registration entry of a type.
    #[must_use]
    pub fn info(&self, type_id: ControllerTypeId) -> Option<&ControllerInfo> {
        self.types.get(usize::from(type_id.0))
    }

    /// Creates a fresh controller from a wire tag.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::UnknownControllerType`] for an unregistered tag.
    pub fn create(&self, type_id: ControllerTypeId) -> CellResult<Box<dyn Controller>> {
        let info = self
            .info(type_id)
            .ok_or_else(|| CellError::UnknownControllerType(format!("#{}", type_id.0)))?;
        let mut controller = (info.factory)();
        controller.base_mut().set_type(info.type_id, info.domain);
        Ok(controller)
    }

    /// Fills in type and domain of a controller built by its own
    /// constructor.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::UnknownControllerType`] if the controller's type
    /// name is not registered.
    pub fn bind(&self, controller: &mut dyn Controller) -> CellResult<ControllerTypeId> {
        let name = controller.type_name();
        let type_id = self
            .type_id(name)
            .ok_or_else(|| CellError::UnknownControllerType(name.to_owned()))?;
        let domain = self.types[usize::from(type_id.0)].domain;
        controller.base_mut().set_type(type_id, domain);
        Ok(type_id)
    }
}

fn new_timer() -> Box<dyn Controller> {
    Box::new(TimerController::default())
}

fn new_proximity() -> Box<dyn Controller> {
    Box::new(ProximityController::default())
}

fn new_move_to_point() -> Box<dyn Controller> {
    Box::new(MoveToPointController::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types() {
        let registry = ControllerRegistry::with_builtin_types();
        assert_eq!(registry.len(), 3);

        let timer = registry.type_id(TimerController::TYPE_NAME).unwrap();
        let controller = registry.create(timer).unwrap();
        assert_eq!(controller.type_name(), TimerController::TYPE_NAME);
        assert_eq!(controller.base().type_id(), timer);
        assert_eq!(controller.base().domain(), ControllerDomain::REAL);
    }

    #[test]
    fn test_builtin_type_ids_follow_registration_order() {
        let registry = ControllerRegistry::with_builtin_types();
        let names = [
            TimerController::TYPE_NAME,
            ProximityController::TYPE_NAME,
            MoveToPointController::TYPE_NAME,
        ];
        for (index, name) in names.into_iter().enumerate() {
            let type_id = registry.type_id(name).unwrap();
            assert_eq!(usize::from(type_id.0), index);
            assert_eq!(registry.info(type_id).unwrap().name, name);
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ControllerRegistry::with_builtin_types();
        let result =
            registry.register(TimerController::TYPE_NAME, ControllerDomain::REAL, new_timer);
        assert_eq!(result, Err(CellError::DuplicateControllerType("Timer")));
    }

    #[test]
    fn test_unknown_type() {
        let registry = ControllerRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.create(ControllerTypeId(9)),
            Err(CellError::UnknownControllerType(_))
        ));

        let mut timer = TimerController::new(5, 0);
        assert!(registry.bind(&mut timer).is_err());
    }
}
