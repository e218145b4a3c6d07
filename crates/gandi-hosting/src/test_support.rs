//! Scripted gateway shared by the unit tests.

use crate::Result;
use async_trait::async_trait;
use gandi_core::value::record_from_json;
use gandi_core::{Error, Record, Value};
use gandi_xmlrpc::Gateway;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

pub fn record(json: serde_json::Value) -> Record {
    record_from_json(json)
}

pub fn value(json: serde_json::Value) -> Value {
    Value::from(json)
}

/// Answers each method from its own queue; the last answer repeats.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<BTreeMap<String, VecDeque<Result<Value>>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: &str, value: Value) {
        self.push(method, Ok(value));
    }

    pub fn respond_json(&self, method: &str, json: serde_json::Value) {
        self.push(method, Ok(value(json)));
    }

    pub fn fail(&self, method: &str, error: Error) {
        self.push(method, Err(error));
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|(method, _)| method).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == method)
            .count()
    }

    fn push(&self, method: &str, answer: Result<Value>) {
        self.script
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(answer);
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.calls.lock().unwrap().push((method.to_string(), args));

        let mut script = self.script.lock().unwrap();
        let Some(queue) = script.get_mut(method) else {
            return Err(Error::NotFound(format!("unscripted method {method}")));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or(Err(Error::NotFound(method.to_string())))
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(Error::NotFound(method.to_string())))
        }
    }
}
