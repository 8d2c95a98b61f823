//! Model descriptors.
//!
//! A [`ModelDescriptor`] is a read-only structural summary of a model, built
//! by hand next to the model and exported as JSON for documentation and
//! catalog tools. The runtime never reads it.
//!
//! ```rust,ignore
//! fn descriptor() -> ModelDescriptor {
//!     ModelDescriptor::new("Counter")
//!         .field(&field!(CounterState => count))
//!         .action("increment")
//!         .output("limit_reached")
//!         .named_test("increments_twice")
//! }
//! ```

use serde::Serialize;

use crate::graph::Connection;
use crate::reactive::{Field, FieldPath};
use crate::store::Model;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub path: FieldPath,
    pub type_name: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDescriptor {
    pub name: String,
    pub model: String,
    /// `fixed`, `scoped` or `presented`.
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub state: Vec<FieldDescriptor>,
    pub actions: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub connections: Vec<ConnectionDescriptor>,
    /// Named test scenarios declared for the model.
    pub tests: Vec<String>,
    /// Named example states declared for the model.
    pub states: Vec<String>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn field<S: 'static, V: 'static>(mut self, field: &Field<S, V>) -> Self {
        self.state.push(FieldDescriptor {
            path: field.path().clone(),
            type_name: std::any::type_name::<V>(),
        });
        self
    }

    pub fn action(mut self, name: impl Into<String>) -> Self {
        self.actions.push(name.into());
        self
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn connection<P: Model, C: Model>(mut self, connection: &Connection<P, C>) -> Self {
        self.connections.push(connection.describe());
        self
    }

    pub fn named_test(mut self, name: impl Into<String>) -> Self {
        self.tests.push(name.into());
        self
    }

    pub fn named_state(mut self, name: impl Into<String>) -> Self {
        self.states.push(name.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
