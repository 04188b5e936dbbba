//! Task descriptor to container spec translation.
//!
//! Each `configure_*` setter owns one fragment of the [`ContainerSpec`] and
//! leaves the spec untouched when its task attribute is unset. Setters touch
//! disjoint fields, with one exception: the hostname is only set when no
//! network mode has been chosen, since the runtime rejects both together.

use crate::container::{ContainerSpec, LogSpec};
use crate::driver::task::ContainerTask;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Label carrying the configured classifier tag.
pub const CLASSIFIER_LABEL: &str = "fn-agent-classifier";
/// Label carrying the driver instance id.
pub const INSTANCE_LABEL: &str = "fn-agent-instance";

/// Fixed uid:gid every function runs as.
pub const CONTAINER_USER: &str = "1000:1000";
/// CFS period in microseconds.
pub const CPU_PERIOD_US: i64 = 100_000;

const TMPFS_TARGET: &str = "/tmp";

/// Driver-wide inputs to translation.
#[derive(Debug, Clone, Copy)]
pub struct Translator<'a> {
    pub label_tag: &'a str,
    pub instance_id: &'a str,
    pub hostname: &'a str,
    pub max_tmpfs_inodes: u64,
    pub read_only_rootfs: bool,
}

impl Translator<'_> {
    /// Apply every setter to `spec`.
    pub fn apply(&self, spec: &mut ContainerSpec, task: &dyn ContainerTask) {
        self.configure_labels(spec);
        configure_logger(spec, task);
        configure_memory(spec, task);
        configure_fs_size(spec, task);
        self.configure_tmpfs(spec, task);
        configure_user(spec);
        configure_uds(spec, task);
        configure_volumes(spec, task);
        configure_cpu(spec, task);
        configure_work_dir(spec, task);
        self.configure_hostname(spec);
        configure_cmd(spec, task);
        configure_env(spec, task);
    }

    pub fn configure_labels(&self, spec: &mut ContainerSpec) {
        if self.label_tag.is_empty() {
            return;
        }

        let labels = spec.labels.get_or_insert_with(BTreeMap::new);
        labels.insert(CLASSIFIER_LABEL.to_string(), self.label_tag.to_string());
        labels.insert(INSTANCE_LABEL.to_string(), self.instance_id.to_string());
    }

    /// Mount /tmp as tmpfs when a size is requested or the root is read-only.
    ///
    /// Without a size (read-only root only) the mount is unlimited and its
    /// option string is empty.
    pub fn configure_tmpfs(&self, spec: &mut ContainerSpec, task: &dyn ContainerTask) {
        let size = task.tmpfs_size();
        if size == 0 && !self.read_only_rootfs {
            return;
        }

        let option = match (size, self.max_tmpfs_inodes) {
            (0, _) => String::new(),
            (size, 0) => format!("size={}m", size),
            (size, inodes) => format!("size={}m,nr_inodes={}", size, inodes),
        };

        debug!(call_id = task.id(), mount = TMPFS_TARGET, options = %option, "setting tmpfs");
        spec.host
            .tmpfs
            .get_or_insert_with(BTreeMap::new)
            .insert(TMPFS_TARGET.to_string(), option);
    }

    pub fn configure_hostname(&self, spec: &mut ContainerSpec) {
        if spec.host.network_mode.is_some() {
            return;
        }

        debug!(call_id = %spec.name, hostname = self.hostname, "setting hostname");
        spec.hostname = Some(self.hostname.to_string());
    }
}

/// Ship output to syslog, or disable logging when there is no endpoint.
pub fn configure_logger(spec: &mut ContainerSpec, task: &dyn ContainerTask) {
    let conf = task.logger_config();
    if conf.url.is_empty() {
        spec.host.log_config = Some(LogSpec {
            driver: "none".to_string(),
            options: BTreeMap::new(),
        });
        return;
    }

    let mut options = BTreeMap::from([
        ("syslog-address".to_string(), conf.url.clone()),
        ("syslog-facility".to_string(), "user".to_string()),
        ("syslog-format".to_string(), "rfc5424".to_string()),
    ]);

    let tags: Vec<String> = conf
        .tags
        .iter()
        .map(|pair| format!("{}={}", pair.name, pair.value))
        .collect();
    if !tags.is_empty() {
        options.insert("tag".to_string(), tags.join(","));
    }

    spec.host.log_config = Some(LogSpec {
        driver: "syslog".to_string(),
        options,
    });
}

/// Memory, memory+swap and kernel memory all get the same limit; no swap.
pub fn configure_memory(spec: &mut ContainerSpec, task: &dyn ContainerTask) {
    if task.memory() == 0 {
        return;
    }

    let mem = clamp_i64(task.memory());
    spec.host.memory = Some(mem);
    spec.host.memory_swap = Some(mem);
    spec.host.kernel_memory = Some(mem);
}

pub fn configure_fs_size(spec: &mut ContainerSpec, task: &dyn ContainerTask) {
    if task.fs_size() == 0 {
        return;
    }

    let opt = format!("{}M", task.fs_size());
    debug!(call_id = task.id(), size = %opt, "setting storage option");
    spec.host
        .storage_opt
        .get_or_insert_with(BTreeMap::new)
        .insert("size".to_string(), opt);
}

pub fn configure_user(spec: &mut ContainerSpec) {
    spec.user = Some(CONTAINER_USER.to_string());
    spec.host.cap_drop = Some(vec!["all".to_string()]);
}

// TODO: reject tasks without a socket path once every front end sets one.
pub fn configure_uds(spec: &mut ContainerSpec, task: &dyn ContainerTask) {
    let Some(path) = task.uds_host_path().filter(|path| !path.is_empty()) else {
        return;
    };

    spec.push_bind(format!("{}:{}", path, task.uds_container_path()));
}

pub fn configure_volumes(spec: &mut ContainerSpec, task: &dyn ContainerTask) {
    if task.volumes().is_empty() {
        return;
    }

    for mapping in task.volumes() {
        spec.volumes
            .get_or_insert_with(BTreeSet::new)
            .insert(mapping.container_dir.clone());
        let bind = format!("{}:{}", mapping.host_dir, mapping.container_dir);
        debug!(call_id = task.id(), volume = %bind, "setting volumes");
        spec.push_bind(bind);
    }
}

/// Milli-CPUs become a CFS quota over a 100ms period: 8000 -> 800000/100000, about 8 cores.
pub fn configure_cpu(spec: &mut ContainerSpec, task: &dyn ContainerTask) {
    if task.cpus() == 0 {
        return;
    }

    let quota = clamp_i64(task.cpus()).saturating_mul(100);
    debug!(call_id = task.id(), quota, period = CPU_PERIOD_US, "setting CPU");
    spec.host.cpu_quota = Some(quota);
    spec.host.cpu_period = Some(CPU_PERIOD_US);
}

pub fn configure_work_dir(spec: &mut ContainerSpec, task: &dyn ContainerTask) {
    let Some(wd) = task.work_dir().filter(|wd| !wd.is_empty()) else {
        return;
    };

    debug!(call_id = task.id(), wd, "setting work dir");
    spec.working_dir = Some(wd.to_string());
}

/// Split the command on whitespace. Quoting is not understood.
pub fn configure_cmd(spec: &mut ContainerSpec, task: &dyn ContainerTask) {
    if task.command().is_empty() {
        return;
    }

    let cmd: Vec<String> = task.command().split_whitespace().map(String::from).collect();
    debug!(call_id = task.id(), ?cmd, len = cmd.len(), "docker command");
    spec.cmd = Some(cmd);
}

pub fn configure_env(spec: &mut ContainerSpec, task: &dyn ContainerTask) {
    if task.env_vars().is_empty() {
        return;
    }

    let env = spec
        .env
        .get_or_insert_with(|| Vec::with_capacity(task.env_vars().len()));
    for (name, value) in task.env_vars() {
        env.push(format!("{}={}", name, value));
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::task::{LoggerConfig, TagPair, TaskSpec, VolumeMapping};

    fn base_spec() -> ContainerSpec {
        ContainerSpec::builder()
            .name("call-1")
            .image("alpine")
            .build()
            .unwrap()
    }

    fn translator() -> Translator<'static> {
        Translator {
            label_tag: "",
            instance_id: "node-1",
            hostname: "runner-1",
            max_tmpfs_inodes: 0,
            read_only_rootfs: false,
        }
    }

    #[test]
    fn test_cpu_quota() {
        for cpus in [1u64, 100, 500, 1000, 8000] {
            let mut task = TaskSpec::new("call-1", "alpine");
            task.cpus = cpus;
            let mut spec = base_spec();
            configure_cpu(&mut spec, &task);

            assert_eq!(spec.host.cpu_quota, Some(cpus as i64 * 100));
            assert_eq!(spec.host.cpu_period, Some(100_000));
        }
    }

    #[test]
    fn test_zero_cpu_leaves_spec_alone() {
        let mut spec = base_spec();
        configure_cpu(&mut spec, &TaskSpec::new("call-1", "alpine"));
        assert_eq!(spec, base_spec());
    }

    #[test]
    fn test_memory_disables_swap() {
        let mut task = TaskSpec::new("call-1", "alpine");
        task.memory = 256 * 1024 * 1024;
        let mut spec = base_spec();
        configure_memory(&mut spec, &task);

        let mem = Some(256 * 1024 * 1024);
        assert_eq!(spec.host.memory, mem);
        assert_eq!(spec.host.memory_swap, mem);
        assert_eq!(spec.host.kernel_memory, mem);
    }

    #[test]
    fn test_fs_size_option() {
        let mut task = TaskSpec::new("call-1", "alpine");
        task.fs_size_mb = 512;
        let mut spec = base_spec();
        configure_fs_size(&mut spec, &task);

        assert_eq!(spec.host.storage_opt.unwrap()["size"], "512M");
    }

    #[test]
    fn test_tmpfs_options() {
        let mut task = TaskSpec::new("call-1", "alpine");
        task.tmpfs_size_mb = 64;

        let mut spec = base_spec();
        translator().configure_tmpfs(&mut spec, &task);
        assert_eq!(spec.host.tmpfs.unwrap()["/tmp"], "size=64m");

        let capped = Translator {
            max_tmpfs_inodes: 1024,
            ..translator()
        };
        let mut spec = base_spec();
        capped.configure_tmpfs(&mut spec, &task);
        assert_eq!(spec.host.tmpfs.unwrap()["/tmp"], "size=64m,nr_inodes=1024");
    }

    #[test]
    fn test_tmpfs_for_read_only_root() {
        let task = TaskSpec::new("call-1", "alpine");

        let mut spec = base_spec();
        translator().configure_tmpfs(&mut spec, &task);
        assert!(spec.host.tmpfs.is_none());

        let read_only = Translator {
            read_only_rootfs: true,
            max_tmpfs_inodes: 1024,
            ..translator()
        };
        let mut spec = base_spec();
        read_only.configure_tmpfs(&mut spec, &task);
        assert_eq!(spec.host.tmpfs.unwrap()["/tmp"], "");
    }

    #[test]
    fn test_labels_only_with_tag() {
        let mut spec = base_spec();
        translator().configure_labels(&mut spec);
        assert!(spec.labels.is_none());

        let tagged = Translator {
            label_tag: "fn-agent-prod",
            ..translator()
        };
        tagged.configure_labels(&mut spec);
        let labels = spec.labels.unwrap();
        assert_eq!(labels[CLASSIFIER_LABEL], "fn-agent-prod");
        assert_eq!(labels[INSTANCE_LABEL], "node-1");
    }

    #[test]
    fn test_logging_disabled_without_url() {
        let mut spec = base_spec();
        configure_logger(&mut spec, &TaskSpec::new("call-1", "alpine"));

        let log = spec.host.log_config.unwrap();
        assert_eq!(log.driver, "none");
        assert!(log.options.is_empty());
    }

    #[test]
    fn test_syslog_logging() {
        let mut task = TaskSpec::new("call-1", "alpine");
        task.logger = LoggerConfig {
            url: "tcp://logs:514".to_string(),
            tags: vec![TagPair::new("app", "demo"), TagPair::new("fn", "hello")],
        };
        let mut spec = base_spec();
        configure_logger(&mut spec, &task);

        let log = spec.host.log_config.unwrap();
        assert_eq!(log.driver, "syslog");
        assert_eq!(log.options["syslog-address"], "tcp://logs:514");
        assert_eq!(log.options["syslog-facility"], "user");
        assert_eq!(log.options["syslog-format"], "rfc5424");
        assert_eq!(log.options["tag"], "app=demo,fn=hello");
    }

    #[test]
    fn test_syslog_without_tags_omits_tag_option() {
        let mut task = TaskSpec::new("call-1", "alpine");
        task.logger.url = "udp://logs:514".to_string();
        let mut spec = base_spec();
        configure_logger(&mut spec, &task);

        assert!(!spec.host.log_config.unwrap().options.contains_key("tag"));
    }

    #[test]
    fn test_user_and_capabilities() {
        let mut spec = base_spec();
        configure_user(&mut spec);
        assert_eq!(spec.user.as_deref(), Some("1000:1000"));
        assert_eq!(spec.host.cap_drop, Some(vec!["all".to_string()]));
    }

    #[test]
    fn test_volumes_and_uds_binds() {
        let mut task = TaskSpec::new("call-1", "alpine");
        task.volumes = vec![VolumeMapping::new("/host/a", "/container/b")];
        task.uds_host_path = Some("/var/run/fn/call-1".to_string());

        let mut spec = base_spec();
        configure_uds(&mut spec, &task);
        configure_volumes(&mut spec, &task);

        assert!(spec.volumes.unwrap().contains("/container/b"));
        assert_eq!(
            spec.host.binds.unwrap(),
            vec![
                "/var/run/fn/call-1:/tmp/iofs".to_string(),
                "/host/a:/container/b".to_string()
            ]
        );
    }

    #[test]
    fn test_missing_uds_path_is_tolerated() {
        let mut spec = base_spec();
        configure_uds(&mut spec, &TaskSpec::new("call-1", "alpine"));
        assert!(spec.host.binds.is_none());
    }

    #[test]
    fn test_hostname_skipped_with_network_mode() {
        let mut spec = base_spec();
        translator().configure_hostname(&mut spec);
        assert_eq!(spec.hostname.as_deref(), Some("runner-1"));

        let mut spec = ContainerSpec::builder()
            .name("call-1")
            .image("alpine")
            .network_mode("container:p1")
            .build()
            .unwrap();
        translator().configure_hostname(&mut spec);
        assert!(spec.hostname.is_none());
    }

    #[test]
    fn test_command_split_on_whitespace() {
        let mut task = TaskSpec::new("call-1", "alpine");
        task.command = "  sh -c   'echo hi' ".to_string();
        let mut spec = base_spec();
        configure_cmd(&mut spec, &task);

        assert_eq!(
            spec.cmd.unwrap(),
            vec!["sh", "-c", "'echo", "hi'"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_env_and_work_dir() {
        let mut task = TaskSpec::new("call-1", "alpine");
        task.env.insert("A".to_string(), "1".to_string());
        task.env.insert("B".to_string(), "x=y".to_string());
        task.work_dir = Some("/function".to_string());

        let mut spec = base_spec();
        configure_env(&mut spec, &task);
        configure_work_dir(&mut spec, &task);

        assert_eq!(spec.env.unwrap(), vec!["A=1".to_string(), "B=x=y".to_string()]);
        assert_eq!(spec.working_dir.as_deref(), Some("/function"));
    }

    #[test]
    fn test_apply_minimal_task() {
        let mut spec = base_spec();
        translator().apply(&mut spec, &TaskSpec::new("call-1", "alpine"));

        assert_eq!(spec.user.as_deref(), Some("1000:1000"));
        assert_eq!(spec.hostname.as_deref(), Some("runner-1"));
        assert!(spec.cmd.is_none());
        assert!(spec.env.is_none());
        assert!(spec.host.memory.is_none());
        assert!(spec.host.cpu_quota.is_none());
        assert!(spec.host.tmpfs.is_none());
    }
}
