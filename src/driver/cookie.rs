//! Per-task lifecycle coordinator.
//!
//! A [`Cookie`] owns one task attempt's leases (prefork slot, network, image
//! cache reference, created container) and moves them through the ordered
//! lifecycle. Out-of-order calls fail with [`CookieError::Usage`] instead of
//! proceeding. State only changes after an awaited runtime call returns
//! successfully, so dropping a stage's future (timeout, `select!`) leaves the
//! cookie where it was; [`Cookie::close`] must still be called afterwards.

use crate::container::{
    CachedImage, ContainerError, ContainerSpec, ImageRef, NetworkLease, PoolLease, RegistryAuth,
    RunResult,
};
use crate::driver::errors::{self, CookieError, UsageViolation};
use crate::driver::task::ContainerTask;
use crate::driver::DockerDriver;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle stage reached so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Leases taken and spec translated
    Created,
    /// Registry credentials resolved
    Authenticated,
    /// Image found locally or pulled
    Validated,
    /// Container exists in the runtime
    ContainerCreated,
    /// Leases released; no further stages allowed
    Closed,
}

/// Result of [`Cookie::validate_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// An earlier call already resolved the image; nothing was asked of the runtime
    AlreadyResolved,
    /// The image is present locally and now marked busy
    Available,
    /// The image is not present; call [`Cookie::pull_image`]
    PullRequired,
}

impl ImageStatus {
    pub fn needs_pull(self) -> bool {
        self == ImageStatus::PullRequired
    }
}

/// Lifecycle coordinator for one task attempt.
pub struct Cookie {
    driver: Arc<DockerDriver>,
    task: Arc<dyn ContainerTask>,
    image_ref: ImageRef,
    spec: ContainerSpec,
    pool_lease: Option<PoolLease>,
    network_lease: Option<NetworkLease>,
    auth: Option<RegistryAuth>,
    image: Option<CachedImage>,
    container: Option<String>,
    stage: Stage,
}

impl Cookie {
    pub(crate) fn new(
        driver: Arc<DockerDriver>,
        task: Arc<dyn ContainerTask>,
    ) -> Result<Self, CookieError> {
        let spec = driver.base_spec(task.as_ref())?;

        let mut cookie = Self {
            image_ref: ImageRef::parse(task.image()),
            driver,
            task,
            spec,
            pool_lease: None,
            network_lease: None,
            auth: None,
            image: None,
            container: None,
            stage: Stage::Created,
        };

        cookie.pick_pool();
        cookie.pick_network();
        // Runs after picking so that a leased network mode suppresses the hostname.
        cookie
            .driver
            .translator()
            .apply(&mut cookie.spec, cookie.task.as_ref());

        Ok(cookie)
    }

    fn pick_pool(&mut self) {
        let Some(pool) = &self.driver.pool else {
            return;
        };
        if self.spec.host.network_mode.is_some() {
            return;
        }

        match pool.acquire() {
            Ok(lease) => {
                debug!(call_id = self.task.id(), pool_id = lease.id(), "using prefork slot");
                self.spec.host.network_mode = Some(lease.network_mode());
                self.pool_lease = Some(lease);
            }
            Err(e) => warn!(call_id = self.task.id(), "no prefork slot: {}", e),
        }
    }

    fn pick_network(&mut self) {
        let Some(network) = &self.driver.network else {
            return;
        };
        if self.spec.host.network_mode.is_some() {
            return;
        }

        if let Some(lease) = network.acquire() {
            debug!(call_id = self.task.id(), network = lease.name(), "using network");
            self.spec.host.network_mode = Some(lease.name().to_string());
            self.network_lease = Some(lease);
        }
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn task_id(&self) -> &str {
        self.task.id()
    }

    /// The translated creation spec, for diagnostics.
    pub fn container_spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn image_ref(&self) -> &ImageRef {
        &self.image_ref
    }

    /// Credentials resolved by [`auth_image`](Self::auth_image).
    pub fn registry_auth(&self) -> Option<&RegistryAuth> {
        self.auth.as_ref()
    }

    /// The resolved image, once validated or pulled.
    pub fn image(&self) -> Option<&CachedImage> {
        self.image.as_ref()
    }

    /// Runtime id of the created container.
    pub fn container_id(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn pool_lease(&self) -> Option<&PoolLease> {
        self.pool_lease.as_ref()
    }

    pub fn network_lease(&self) -> Option<&NetworkLease> {
        self.network_lease.as_ref()
    }

    fn ensure_open(&self) -> Result<(), CookieError> {
        if self.stage == Stage::Closed {
            return Err(self.violation(UsageViolation::Closed));
        }
        Ok(())
    }

    fn require_auth(&self) -> Result<RegistryAuth, CookieError> {
        self.auth
            .clone()
            .ok_or_else(|| self.violation(UsageViolation::NotAuthenticated))
    }

    fn require_container(&self) -> Result<(), CookieError> {
        self.ensure_open()?;
        if self.container.is_none() {
            return Err(self.violation(UsageViolation::ContainerNotCreated));
        }
        Ok(())
    }

    fn violation(&self, violation: UsageViolation) -> CookieError {
        error!(call_id = self.task.id(), stage = ?self.stage, "{}", violation);
        CookieError::Usage(violation)
    }

    fn advance(&mut self, stage: Stage) {
        if self.stage < stage {
            self.stage = stage;
        }
    }

    fn resolve_image(&mut self, image: CachedImage) {
        if let Some(cache) = &self.driver.image_cache {
            cache.mark_busy(&image);
        }
        self.image = Some(image);
        self.advance(Stage::Validated);
    }

    /// Resolve registry credentials for the task image.
    ///
    /// The driver-wide table provides the base credential; a task that can
    /// supply its own overrides it with any non-empty answer.
    pub async fn auth_image(&mut self) -> Result<(), CookieError> {
        self.ensure_open()?;
        debug!(call_id = self.task.id(), "docker auth image");

        let mut auth = self.driver.credentials.lookup(&self.image_ref.registry);

        if let Some(auther) = self.task.registry_auther() {
            match auther.registry_auth().await {
                Ok(Some(custom)) => auth = custom,
                Ok(None) => {}
                Err(e) => {
                    error!(call_id = self.task.id(), "task registry auth failed: {:#}", e);
                    return Err(CookieError::Auth(e));
                }
            }
        }

        self.auth = Some(auth);
        self.advance(Stage::Authenticated);
        Ok(())
    }

    /// Check whether the image is already present locally.
    ///
    /// A present image is recorded and marked busy in the image cache.
    pub async fn validate_image(&mut self) -> Result<ImageStatus, CookieError> {
        self.ensure_open()?;
        self.require_auth()?;
        if self.image.is_some() {
            return Ok(ImageStatus::AlreadyResolved);
        }

        debug!(call_id = self.task.id(), image = self.task.image(), "docker inspect image");
        match self.driver.runtime.inspect_image(self.task.image()).await {
            Ok(image) => {
                self.resolve_image(image);
                Ok(ImageStatus::Available)
            }
            Err(ContainerError::NoSuchImage(_)) => Ok(ImageStatus::PullRequired),
            Err(e) => Err(e.into()),
        }
    }

    /// Pull the image, then inspect it so it joins cache accounting.
    ///
    /// Pull failures are classified; an image that disappears between the
    /// pull and the inspect is reported as [`CookieError::ServerBusy`].
    pub async fn pull_image(&mut self) -> Result<(), CookieError> {
        self.ensure_open()?;
        let auth = self.require_auth()?;
        if self.image.is_some() {
            return Ok(());
        }

        let repository = self.image_ref.pull_repository();
        debug!(
            call_id = self.task.id(),
            image = self.task.image(),
            registry = auth.server_address.as_deref().unwrap_or_default(),
            username = auth.username.as_deref().unwrap_or_default(),
            "docker pull"
        );

        if let Err(e) = self
            .driver
            .runtime
            .pull_image(&repository, &self.image_ref.tag, &auth)
            .await
        {
            error!(call_id = self.task.id(), "Failed to pull image: {}", e);
            return Err(errors::classify_pull_error(self.task.image(), e));
        }

        match self.driver.runtime.inspect_image(self.task.image()).await {
            Ok(image) => {
                self.resolve_image(image);
                Ok(())
            }
            Err(ContainerError::NoSuchImage(_)) => {
                error!(call_id = self.task.id(), "image removed right after pull");
                Err(CookieError::ServerBusy)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create the container from the translated spec. At most once per cookie.
    pub async fn create_container(&mut self) -> Result<(), CookieError> {
        self.ensure_open()?;
        if self.image.is_none() {
            return Err(self.violation(UsageViolation::ImageNotValidated));
        }
        if self.container.is_some() {
            return Ok(());
        }

        debug!(call_id = self.task.id(), image = self.task.image(), "docker create container");
        match self.driver.runtime.create_container(&self.spec).await {
            Ok(id) => {
                self.container = Some(id);
                self.advance(Stage::ContainerCreated);
                Ok(())
            }
            Err(ContainerError::NoSuchImage(image)) => {
                // Evicted after validation; another placement will likely succeed.
                error!(call_id = self.task.id(), "Cannot create container, image {} likely removed", image);
                Err(errors::classify_create_error(ContainerError::NoSuchImage(image)))
            }
            Err(e) => {
                error!(call_id = self.task.id(), "Could not create container: {}", e);
                Err(errors::classify_create_error(e))
            }
        }
    }

    /// Authenticate, validate, pull if needed and create.
    pub async fn prepare(&mut self) -> Result<(), CookieError> {
        self.auth_image().await?;
        if self.validate_image().await?.needs_pull() {
            self.pull_image().await?;
        }
        self.create_container().await
    }

    /// Start the container and wait for it to finish.
    pub async fn run(&self) -> Result<RunResult, CookieError> {
        self.require_container()?;

        let result = self
            .driver
            .runtime
            .run(self.task.id(), self.task.timeout())
            .await?;
        info!(
            call_id = self.task.id(),
            status = %result.status,
            exit_code = result.exit_code,
            "container finished"
        );
        Ok(result)
    }

    /// Pause the container.
    pub async fn freeze(&self) -> Result<(), CookieError> {
        self.require_container()?;
        debug!(call_id = self.task.id(), "docker pause");

        self.driver
            .runtime
            .pause_container(self.task.id())
            .await
            .map_err(|e| {
                error!(call_id = self.task.id(), "error pausing container: {}", e);
                CookieError::from(e)
            })
    }

    /// Resume a paused container.
    pub async fn unfreeze(&self) -> Result<(), CookieError> {
        self.require_container()?;
        debug!(call_id = self.task.id(), "docker unpause");

        self.driver
            .runtime
            .unpause_container(self.task.id())
            .await
            .map_err(|e| {
                error!(call_id = self.task.id(), "error unpausing container: {}", e);
                CookieError::from(e)
            })
    }

    /// Tear everything down, whatever stage was reached.
    ///
    /// Removes the container if one was created, then releases the prefork
    /// slot, the network and the image cache reference. Only a removal
    /// failure is reported; releases always happen. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), CookieError> {
        if self.stage == Stage::Closed {
            return Ok(());
        }

        let mut result = Ok(());
        if self.container.is_some() {
            let removed = self.driver.runtime.remove_container(self.task.id()).await;
            self.container = None;
            if let Err(e) = removed {
                error!(call_id = self.task.id(), "error removing container: {}", e);
                result = Err(CookieError::from(e));
            }
        }

        self.release_leases();
        self.stage = Stage::Closed;
        debug!(call_id = self.task.id(), "cookie closed");
        result
    }

    fn release_leases(&mut self) {
        if let Some(lease) = self.pool_lease.take() {
            if let Some(pool) = &self.driver.pool {
                pool.release(lease);
            }
        }
        if let Some(lease) = self.network_lease.take() {
            if let Some(network) = &self.driver.network {
                network.release(lease);
            }
        }
        if let Some(image) = self.image.take() {
            if let Some(cache) = &self.driver.image_cache {
                cache.mark_free(&image);
            }
        }
    }
}

impl Drop for Cookie {
    fn drop(&mut self) {
        if self.stage == Stage::Closed {
            return;
        }
        if let Some(container) = &self.container {
            warn!(
                call_id = self.task.id(),
                "cookie dropped without close; container {} left behind",
                container
            );
            // The orphan still occupies the slot's namespace.
            if let Some(lease) = self.pool_lease.take() {
                warn!(
                    call_id = self.task.id(),
                    pool_id = lease.id(),
                    "prefork slot withheld from the pool"
                );
            }
        }
        self.release_leases();
    }
}

impl std::fmt::Debug for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cookie")
            .field("task_id", &self.task.id())
            .field("stage", &self.stage)
            .field("image", &self.image)
            .field("container", &self.container)
            .field("pool_lease", &self.pool_lease)
            .field("network_lease", &self.network_lease)
            .finish()
    }
}
