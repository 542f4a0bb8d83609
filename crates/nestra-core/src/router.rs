//! Operation dispatch over hot-swappable modules.
//!
//! The router is the sole externally reachable entry point. It maps 4-byte
//! operation selectors to installed modules, all of which execute directly
//! against the one shared [`StoreState`]. Routing entries can be installed,
//! replaced, and removed atomically at runtime; a failed table mutation
//! leaves the table untouched.
//!
//! Dispatch is all-or-nothing: the resolved module runs against a scratch
//! copy of the store which is committed only when the module returns
//! success, so every failure reverts the invocation's state changes, ledger
//! movements, and emitted events in one step.

use crate::events::Event;
use crate::metrics::RouterMetrics;
use crate::modules::{Request, Response};
use crate::store::StoreState;
use crate::{
    Address, Amount, CallContext, ModuleId, NestraConfig, NestraError, OperationId, Result,
    Timestamp,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// An independently swappable unit of behavior sharing the router's store.
pub trait Module: Send + Sync {
    /// Stable identifier, derived from the module name.
    fn module_id(&self) -> ModuleId;

    /// Human-readable module name.
    fn name(&self) -> &'static str;

    /// The operations this module implements.
    fn operations(&self) -> Vec<OperationId>;

    /// Execute one operation against the shared store.
    fn invoke(
        &self,
        request: &Request,
        call: &CallContext,
        store: &mut StoreState,
    ) -> Result<Response>;
}

/// Dispatch router owning the shared store and the installed module set.
pub struct DispatchRouter {
    modules: BTreeMap<ModuleId, Arc<dyn Module>>,
    state: StoreState,
    metrics: RouterMetrics,
}

impl DispatchRouter {
    /// Create a router with an empty routing table.
    pub fn new(controller: Address, config: NestraConfig) -> Self {
        Self {
            modules: BTreeMap::new(),
            state: StoreState::new(controller, config),
            metrics: RouterMetrics::new(),
        }
    }

    /// Create a router with the standard module set installed: registry,
    /// fee engine, and nesting engine. This is the seam the deployment
    /// collaborator drives.
    pub fn bootstrap(controller: Address, config: NestraConfig) -> Result<Self> {
        use crate::modules::{FeeModule, NestingModule, RegistryModule};

        let mut router = Self::new(controller, config);
        let standard: Vec<Arc<dyn Module>> = vec![
            Arc::new(RegistryModule),
            Arc::new(FeeModule),
            Arc::new(NestingModule),
        ];
        for module in standard {
            let operations = module.operations();
            router.install_or_replace(controller, module, &operations)?;
        }
        Ok(router)
    }

    /// Read access to the shared store.
    pub fn store(&self) -> &StoreState {
        &self.state
    }

    /// Dispatch metrics.
    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// Atomically point `operation_ids` at `module`, installing the module
    /// if it is new.
    ///
    /// Rejects an empty id list, and rejects re-pointing an id at the
    /// module that already owns it: a no-op disguised as a change signals a
    /// configuration error upstream.
    pub fn install_or_replace(
        &mut self,
        caller: Address,
        module: Arc<dyn Module>,
        operation_ids: &[OperationId],
    ) -> Result<()> {
        self.state.require_controller(caller)?;
        if operation_ids.is_empty() {
            return Err(NestraError::InvalidParameter(
                "install requires at least one operation id".into(),
            ));
        }

        let module_id = module.module_id();
        let mut seen = std::collections::BTreeSet::new();
        for op in operation_ids {
            if !seen.insert(*op) || self.state.routes.get(op) == Some(&module_id) {
                return Err(NestraError::DuplicateRoute {
                    operation: *op,
                    module: module_id,
                });
            }
        }

        // Validated; apply the whole cut.
        for op in operation_ids {
            self.state.routes.insert(*op, module_id);
        }
        self.modules.insert(module_id, module);
        self.retain_routed_modules();

        debug!(module = %module_id, operations = operation_ids.len(), "installed routes");
        self.state.journal.emit(Event::RoutesInstalled {
            module: module_id,
            operations: operation_ids.to_vec(),
        });
        Ok(())
    }

    /// Atomically delete the named routes. Every id must currently be
    /// routed; unknown ids fail the whole cut with `NotFound`.
    pub fn remove(&mut self, caller: Address, operation_ids: &[OperationId]) -> Result<()> {
        self.state.require_controller(caller)?;
        if operation_ids.is_empty() {
            return Err(NestraError::InvalidParameter(
                "removal requires at least one operation id".into(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        for op in operation_ids {
            if !seen.insert(*op) || !self.state.routes.contains_key(op) {
                return Err(NestraError::NotFound(format!("route for operation {op}")));
            }
        }

        for op in operation_ids {
            self.state.routes.remove(op);
        }
        self.retain_routed_modules();

        self.state.journal.emit(Event::RoutesRemoved {
            operations: operation_ids.to_vec(),
        });
        Ok(())
    }

    /// Drop module objects that no longer own any route, keeping the
    /// installed set consistent with the table.
    fn retain_routed_modules(&mut self) {
        let routes = &self.state.routes;
        self.modules
            .retain(|module_id, _| routes.values().any(|owner| owner == module_id));
    }

    /// Resolve the module owning `operation`. Unmapped operations surface
    /// the system's top-level not-found error.
    pub fn route(&self, operation: OperationId) -> Result<ModuleId> {
        self.state
            .routes
            .get(&operation)
            .copied()
            .ok_or_else(|| NestraError::NotFound(format!("unsupported operation {operation}")))
    }

    /// Identifiers of all installed modules.
    pub fn list_modules(&self) -> Vec<ModuleId> {
        self.modules.keys().copied().collect()
    }

    /// Operations currently routed to `module`, in selector order.
    pub fn list_operations(&self, module: ModuleId) -> Result<Vec<OperationId>> {
        if !self.modules.contains_key(&module) {
            return Err(NestraError::NotFound(format!("module {module}")));
        }
        Ok(self
            .state
            .routes
            .iter()
            .filter(|(_, owner)| **owner == module)
            .map(|(op, _)| *op)
            .collect())
    }

    /// Execute one invocation: resolve the request's operation, run the
    /// owning module against a scratch copy of the store, and commit the
    /// copy only on success.
    pub fn dispatch(
        &mut self,
        caller: Address,
        value: Amount,
        now: Timestamp,
        request: &Request,
    ) -> Result<Response> {
        self.metrics.dispatches.inc();
        let operation = request.operation_id();
        let module_id = self.route(operation)?;
        let module = self
            .modules
            .get(&module_id)
            .cloned()
            .ok_or_else(|| NestraError::NotFound(format!("module {module_id}")))?;

        let call = CallContext::new(caller, value, now);
        let mut scratch = self.state.clone();
        match module.invoke(request, &call, &mut scratch) {
            Ok(response) => {
                self.state = scratch;
                Ok(response)
            }
            Err(err) => {
                self.metrics.dispatch_failures.inc();
                warn!(%operation, module = %module_id, error = %err, "invocation reverted");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{ops, FeeModule, RegistryModule};

    const CONTROLLER: Address = Address::repeat(0xc0);
    const OUTSIDER: Address = Address::repeat(0x0f);

    fn router() -> DispatchRouter {
        DispatchRouter::new(CONTROLLER, NestraConfig::default())
    }

    fn registry_ops() -> Vec<OperationId> {
        RegistryModule.operations()
    }

    #[test]
    fn install_rejects_empty_operation_list() {
        let mut router = router();
        let err = router
            .install_or_replace(CONTROLLER, Arc::new(RegistryModule), &[])
            .unwrap_err();
        assert!(matches!(err, NestraError::InvalidParameter(_)));
    }

    #[test]
    fn install_is_controller_only() {
        let mut router = router();
        let err = router
            .install_or_replace(OUTSIDER, Arc::new(RegistryModule), &registry_ops())
            .unwrap_err();
        assert_eq!(err, NestraError::Unauthorized { caller: OUTSIDER });
    }

    #[test]
    fn reinstalling_same_route_is_duplicate() {
        let mut router = router();
        let operations = registry_ops();
        router
            .install_or_replace(CONTROLLER, Arc::new(RegistryModule), &operations)
            .unwrap();
        let err = router
            .install_or_replace(CONTROLLER, Arc::new(RegistryModule), &operations[..1])
            .unwrap_err();
        assert!(matches!(err, NestraError::DuplicateRoute { .. }));
    }

    #[test]
    fn failed_install_leaves_table_untouched() {
        let mut router = router();
        let operations = registry_ops();
        router
            .install_or_replace(CONTROLLER, Arc::new(RegistryModule), &operations[..2])
            .unwrap();

        // Mixed cut: one fresh id plus one already owned.
        let err = router
            .install_or_replace(
                CONTROLLER,
                Arc::new(RegistryModule),
                &[operations[2], operations[0]],
            )
            .unwrap_err();
        assert!(matches!(err, NestraError::DuplicateRoute { .. }));
        assert!(router.route(operations[2]).is_err());
        assert_eq!(
            router.list_operations(RegistryModule.module_id()).unwrap(),
            {
                let mut expected = operations[..2].to_vec();
                expected.sort();
                expected
            }
        );
    }

    #[test]
    fn replace_repoints_route_and_drops_orphaned_module() {
        let mut router = router();
        let operations = registry_ops();
        router
            .install_or_replace(CONTROLLER, Arc::new(RegistryModule), &operations)
            .unwrap();

        // Re-point every registry operation at the fee module.
        router
            .install_or_replace(CONTROLLER, Arc::new(FeeModule), &operations)
            .unwrap();
        assert_eq!(router.route(operations[0]).unwrap(), FeeModule.module_id());
        assert_eq!(router.list_modules(), vec![FeeModule.module_id()]);
    }

    #[test]
    fn remove_unrouted_operation_is_not_found() {
        let mut router = router();
        let err = router
            .remove(CONTROLLER, &[OperationId::from_signature("ghost()")])
            .unwrap_err();
        assert!(matches!(err, NestraError::NotFound(_)));
    }

    #[test]
    fn failed_remove_is_atomic() {
        let mut router = router();
        let operations = registry_ops();
        router
            .install_or_replace(CONTROLLER, Arc::new(RegistryModule), &operations)
            .unwrap();
        let err = router
            .remove(
                CONTROLLER,
                &[operations[0], OperationId::from_signature("ghost()")],
            )
            .unwrap_err();
        assert!(matches!(err, NestraError::NotFound(_)));
        assert!(router.route(operations[0]).is_ok());
    }

    #[test]
    fn route_unmapped_operation_is_not_found() {
        let router = router();
        let err = router
            .route(OperationId::from_signature("ghost()"))
            .unwrap_err();
        assert!(matches!(err, NestraError::NotFound(_)));
    }

    #[test]
    fn bootstrap_installs_three_modules() {
        let router = DispatchRouter::bootstrap(CONTROLLER, NestraConfig::default()).unwrap();
        assert_eq!(router.list_modules().len(), 3);
        assert!(router
            .route(OperationId::from_signature(ops::ACCEPT_CHILD))
            .is_ok());
        assert!(router
            .route(OperationId::from_signature(ops::UPDATE_DEFAULT_RATE))
            .is_ok());
        assert!(router
            .route(OperationId::from_signature(ops::REGISTER_WHITELIST))
            .is_ok());
    }
}
