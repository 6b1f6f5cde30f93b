// Test Support
// Fixture trees and a scripted provisioner for scheduler tests

use crate::config::{ConfigTree, MemorySource};
use crate::models::UnitPath;
use crate::provisioner::{ProvisionError, ProvisionOutcome, ProvisionRequest, Provisioner};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Build a tree from `(path, yaml)` pairs rooted at `/live`
pub fn memory_tree(documents: &[(&str, &str)]) -> ConfigTree {
    let source = documents
        .iter()
        .fold(MemorySource::new("/live"), |source, (path, yaml)| {
            source.with_yaml(path, yaml).unwrap()
        });
    ConfigTree::from_source(&source).unwrap()
}

/// `dev/network <- dev/compute <- dev/app`, each edge declaring mock outputs
pub fn chain_tree() -> ConfigTree {
    memory_tree(&[
        (
            "root.yaml",
            "locals:\n  project: demo\ninputs:\n  labels:\n    env: dev\n",
        ),
        (
            "dev/network/unit.yaml",
            "include: ../../root.yaml\ninputs:\n  cidr: 10.0.0.0/16\n",
        ),
        (
            "dev/compute/unit.yaml",
            r#"include: ../../root.yaml
dependencies:
  network:
    config_path: ../network
    mock_outputs:
      vpc_id: mock-vpc
inputs:
  vpc_id: ${dependency.network.outputs.vpc_id}
  machine_type: e2-standard-4
"#,
        ),
        (
            "dev/app/unit.yaml",
            r#"include: ../../root.yaml
dependencies:
  compute:
    config_path: ../compute
    mock_outputs:
      instance_id: mock-instance
inputs:
  instance: ${dependency.compute.outputs.instance_id}
  name: ${local.project}-app
"#,
        ),
    ])
}

pub fn unit(path: &str) -> UnitPath {
    UnitPath::new(path).unwrap()
}

enum Behavior {
    Fail(String),
    Transient(String),
    /// Fail transiently this many more times, then succeed
    Flaky(u32),
}

/// Provisioner with per-unit scripted behavior that records every call
#[derive(Default)]
pub struct ScriptedProvisioner {
    outputs: HashMap<UnitPath, Map<String, Value>>,
    behaviors: Mutex<HashMap<UnitPath, Behavior>>,
    delay: Duration,
    calls: Mutex<Vec<ProvisionRequest>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outputs(mut self, path: &str, outputs: Value) -> Self {
        let outputs = outputs.as_object().cloned().unwrap_or_default();
        self.outputs.insert(unit(path), outputs);
        self
    }

    pub fn failing(self, path: &str, message: &str) -> Self {
        self.script(path, Behavior::Fail(message.to_string()))
    }

    pub fn transient(self, path: &str, message: &str) -> Self {
        self.script(path, Behavior::Transient(message.to_string()))
    }

    pub fn flaky(self, path: &str, times: u32) -> Self {
        self.script(path, Behavior::Flaky(times))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn script(self, path: &str, behavior: Behavior) -> Self {
        self.behaviors.lock().unwrap().insert(unit(path), behavior);
        self
    }

    pub fn calls(&self) -> Vec<ProvisionRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Units in the order their calls started
    pub fn call_order(&self) -> Vec<UnitPath> {
        self.calls().into_iter().map(|r| r.unit).collect()
    }

    pub fn call_count(&self, path: &str) -> usize {
        let path = unit(path);
        self.calls().iter().filter(|r| r.unit == path).count()
    }

    pub fn request_for(&self, path: &str) -> Option<ProvisionRequest> {
        let path = unit(path);
        self.calls().into_iter().rev().find(|r| r.unit == path)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for ScriptedProvisioner {
    async fn execute(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, ProvisionError> {
        self.calls.lock().unwrap().push(request.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let result = {
            let mut behaviors = self.behaviors.lock().unwrap();
            match behaviors.get_mut(&request.unit) {
                Some(Behavior::Fail(message)) => Err(ProvisionError::Permanent(message.clone())),
                Some(Behavior::Transient(message)) => {
                    Err(ProvisionError::Transient(message.clone()))
                }
                Some(Behavior::Flaky(remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(ProvisionError::Transient("service unavailable".to_string()))
                }
                _ => Ok(()),
            }
        };

        result.map(|()| ProvisionOutcome {
            outputs: self.outputs.get(&request.unit).cloned().unwrap_or_default(),
        })
    }
}
