use std::fmt::Debug;

/// Produces the identifier a process publishes as its `container`.
pub trait ContainerIdFactory: Debug + Send + Sync {
    fn new_container_id(&self) -> String;
}

/// `<hostname>-<pid>`, falling back to `localhost` when no host name is set.
#[derive(Debug, Clone, Default)]
pub struct DefaultContainerIdFactory;

impl ContainerIdFactory for DefaultContainerIdFactory {
    fn new_container_id(&self) -> String {
        let host = ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        format!("{}-{}", host, std::process::id())
    }
}

/// Random id per call; useful when several members share one process.
#[derive(Debug, Clone, Default)]
pub struct UuidContainerIdFactory;

impl ContainerIdFactory for UuidContainerIdFactory {
    fn new_container_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
