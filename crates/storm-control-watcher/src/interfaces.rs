//! Host interface discovery over rtnetlink.

use futures::future::BoxFuture;
use futures::TryStreamExt;
use rtnetlink::{new_connection, packet_route::link::LinkAttribute, Handle};
use storm_control_core::{Error, InterfaceInfo};

/// The interface-listing capability `Supervisor` depends on. Lets tests
/// inject a fake list instead of opening a real netlink socket.
pub trait InterfaceSource: Send + Sync {
    fn list_interfaces(&self) -> BoxFuture<'_, Result<Vec<InterfaceInfo>, Error>>;
}

/// Thin wrapper over an rtnetlink handle, used only to list the
/// interfaces currently present on the host.
pub struct InterfaceLister {
    handle: Handle,
}

impl InterfaceLister {
    pub fn new() -> Result<Self, Error> {
        let (connection, handle, _) =
            new_connection().map_err(|e| Error::Config(format!("netlink connection: {e}")))?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Lists every interface currently visible to the host, index and
    /// name only (everything the watcher needs to key the kernel maps
    /// and match against configuration).
    pub async fn list(&self) -> Result<Vec<InterfaceInfo>, Error> {
        let mut links = self.handle.link().get().execute();
        let mut interfaces = Vec::new();

        while let Some(msg) =
            links.try_next().await.map_err(|e| Error::Config(format!("listing interfaces: {e}")))?
        {
            let name = msg
                .attributes
                .iter()
                .find_map(|attr| if let LinkAttribute::IfName(name) = attr { Some(name.clone()) } else { None })
                .unwrap_or_else(|| format!("if{}", msg.header.index));

            interfaces.push(InterfaceInfo { index: msg.header.index, name });
        }

        Ok(interfaces)
    }
}

impl InterfaceSource for InterfaceLister {
    fn list_interfaces(&self) -> BoxFuture<'_, Result<Vec<InterfaceInfo>, Error>> {
        Box::pin(self.list())
    }
}

#[cfg(test)]
pub struct FakeInterfaceSource {
    interfaces: std::sync::Mutex<Vec<InterfaceInfo>>,
}

#[cfg(test)]
impl FakeInterfaceSource {
    pub fn new(interfaces: Vec<InterfaceInfo>) -> Self {
        Self { interfaces: std::sync::Mutex::new(interfaces) }
    }

    pub fn set(&self, interfaces: Vec<InterfaceInfo>) {
        *self.interfaces.lock().expect("poisoned") = interfaces;
    }
}

#[cfg(test)]
impl InterfaceSource for FakeInterfaceSource {
    fn list_interfaces(&self) -> BoxFuture<'_, Result<Vec<InterfaceInfo>, Error>> {
        let interfaces = self.interfaces.lock().expect("poisoned").clone();
        Box::pin(async move { Ok(interfaces) })
    }
}
