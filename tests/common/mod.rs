//! Shared fixtures for driver integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use fn_agent::container::{
    CachedImage, ContainerError, ContainerRuntime, ContainerSpec, RegistryAuth, Result, RunResult,
};
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// One call observed by [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Inspect(String),
    Pull {
        repository: String,
        tag: String,
        auth: RegistryAuth,
    },
    Create(ContainerSpec),
    Remove(String),
    Pause(String),
    Unpause(String),
    Run(String, Option<Duration>),
}

/// In-memory runtime that records every call.
///
/// Images listed in `present` inspect successfully; a successful pull makes
/// the image present unless `pull_drops_image` is set. Each `fail_*` slot
/// fails the next matching call once.
#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<Call>>,
    present: Mutex<HashSet<String>>,
    pub pull_drops_image: AtomicBool,
    pub hang_pull: AtomicBool,
    fail_inspect: Mutex<Option<ContainerError>>,
    fail_pull: Mutex<Option<ContainerError>>,
    fail_create: Mutex<Option<ContainerError>>,
    fail_remove: Mutex<Option<ContainerError>>,
    fail_pause: Mutex<Option<ContainerError>>,
    exit_code: Mutex<i64>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.present.lock().unwrap().insert(image.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn created_spec(&self) -> Option<ContainerSpec> {
        self.calls().into_iter().find_map(|c| match c {
            Call::Create(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn fail_inspect_once(&self, err: ContainerError) {
        *self.fail_inspect.lock().unwrap() = Some(err);
    }

    pub fn fail_pull_once(&self, err: ContainerError) {
        *self.fail_pull.lock().unwrap() = Some(err);
    }

    pub fn fail_create_once(&self, err: ContainerError) {
        *self.fail_create.lock().unwrap() = Some(err);
    }

    pub fn fail_remove_once(&self, err: ContainerError) {
        *self.fail_remove.lock().unwrap() = Some(err);
    }

    pub fn fail_pause_once(&self, err: ContainerError) {
        *self.fail_pause.lock().unwrap() = Some(err);
    }

    pub fn set_exit_code(&self, code: i64) {
        *self.exit_code.lock().unwrap() = code;
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn take(slot: &Mutex<Option<ContainerError>>) -> Result<()> {
        match slot.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Image record the fake reports for `name`.
pub fn cached_image(name: &str) -> CachedImage {
    CachedImage {
        id: format!("sha256:{}", name.replace([':', '/'], "-")),
        parent_id: String::new(),
        repo_tags: vec![name.to_string()],
        size: 1024,
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect_image(&self, image: &str) -> Result<CachedImage> {
        self.record(Call::Inspect(image.to_string()));
        Self::take(&self.fail_inspect)?;

        if self.present.lock().unwrap().contains(image) {
            Ok(cached_image(image))
        } else {
            Err(ContainerError::NoSuchImage(image.to_string()))
        }
    }

    async fn pull_image(&self, repository: &str, tag: &str, auth: &RegistryAuth) -> Result<()> {
        self.record(Call::Pull {
            repository: repository.to_string(),
            tag: tag.to_string(),
            auth: auth.clone(),
        });
        if self.hang_pull.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Self::take(&self.fail_pull)?;

        if !self.pull_drops_image.load(Ordering::SeqCst) {
            let mut present = self.present.lock().unwrap();
            present.insert(format!("{}:{}", repository, tag));
            present.insert(repository.to_string());
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(Call::Create(spec.clone()));
        Self::take(&self.fail_create)?;
        Ok(format!("id-{}", spec.name))
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.record(Call::Remove(name.to_string()));
        Self::take(&self.fail_remove)
    }

    async fn pause_container(&self, name: &str) -> Result<()> {
        self.record(Call::Pause(name.to_string()));
        Self::take(&self.fail_pause)
    }

    async fn unpause_container(&self, name: &str) -> Result<()> {
        self.record(Call::Unpause(name.to_string()));
        Ok(())
    }

    async fn run(&self, name: &str, timeout: Option<Duration>) -> Result<RunResult> {
        self.record(Call::Run(name.to_string(), timeout));
        Ok(RunResult::exited(*self.exit_code.lock().unwrap(), Utc::now()))
    }
}
