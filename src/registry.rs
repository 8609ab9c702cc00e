//! Registry of operations available to the orchestrator

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{OrchestratorError, Result};
use crate::traits::OperationExecutor;
use crate::types::OperationDefinition;

/// A definition paired with its executor
#[derive(Clone)]
pub struct RegisteredOperation {
    pub definition: OperationDefinition,
    pub executor: Arc<dyn OperationExecutor>,
}

impl std::fmt::Debug for RegisteredOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredOperation")
            .field("definition", &self.definition)
            .finish()
    }
}

/// Thread-safe registry of operation definitions and their executors
pub struct OperationRegistry {
    operations: Arc<RwLock<HashMap<String, RegisteredOperation>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            operations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an operation. Fails if the name is already taken or if any
    /// declared dependency has not been registered yet.
    pub async fn register(
        &self,
        definition: OperationDefinition,
        executor: Arc<dyn OperationExecutor>,
    ) -> Result<()> {
        let mut operations = self.operations.write().await;
        let name = definition.name.clone();

        if operations.contains_key(&name) {
            return Err(OrchestratorError::duplicate_operation(name));
        }
        for dependency in &definition.dependencies {
            if !operations.contains_key(dependency) {
                return Err(OrchestratorError::unregistered_dependency(
                    &name, dependency,
                ));
            }
        }

        tracing::debug!(operation = %name, "registered operation");
        operations.insert(
            name,
            RegisteredOperation {
                definition,
                executor,
            },
        );
        Ok(())
    }

    /// Remove an operation from the registry.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let mut operations = self.operations.write().await;

        if operations.remove(name).is_none() {
            return Err(OrchestratorError::unknown_operation(name));
        }

        tracing::debug!(operation = %name, "unregistered operation");
        Ok(())
    }

    /// Look up an operation together with its executor.
    pub async fn get(&self, name: &str) -> Option<RegisteredOperation> {
        let operations = self.operations.read().await;
        operations.get(name).cloned()
    }

    /// Look up just the definition.
    pub async fn definition(&self, name: &str) -> Option<OperationDefinition> {
        let operations = self.operations.read().await;
        operations.get(name).map(|op| op.definition.clone())
    }

    /// All registered definitions.
    pub async fn definitions(&self) -> Vec<OperationDefinition> {
        let operations = self.operations.read().await;
        operations.values().map(|op| op.definition.clone()).collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        let operations = self.operations.read().await;
        operations.contains_key(name)
    }

    pub async fn count(&self) -> usize {
        let operations = self.operations.read().await;
        operations.len()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
