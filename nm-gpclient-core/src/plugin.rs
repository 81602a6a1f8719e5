//! NetworkManager VPN plugin D-Bus interface
//!
//! Method calls are handed to the [`Session`]; session events come back
//! through [`forward_events`] and leave as signals.

use crate::vpn::connection_event::PluginEvent;
use crate::vpn::discovery::Ip4Config;
use crate::vpn::session::Session;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{OwnedValue, Value};
use zbus::{connection, fdo, interface, Connection};

/// Well-known bus name NetworkManager looks for
pub const DEFAULT_BUS_NAME: &str = "org.freedesktop.NetworkManager.gpclient";

/// Object path of the plugin
pub const PLUGIN_PATH: &str = "/org/freedesktop/NetworkManager/VPN/Plugin";

type Settings = HashMap<String, HashMap<String, OwnedValue>>;

/// Exported `org.freedesktop.NetworkManager.VPN.Plugin` object
pub struct VpnPlugin {
    session: Session,
}

impl VpnPlugin {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[interface(name = "org.freedesktop.NetworkManager.VPN.Plugin")]
impl VpnPlugin {
    #[zbus(property)]
    fn state(&self) -> u32 {
        self.session.state().code()
    }

    async fn connect(&self, connection: Settings) -> fdo::Result<()> {
        info!("Connect request received");
        self.session.connect(connection).await.map_err(fdo::Error::from)
    }

    async fn connect_interactive(
        &self,
        connection: Settings,
        _details: HashMap<String, OwnedValue>,
    ) -> fdo::Result<()> {
        info!("ConnectInteractive request received");
        self.connect(connection).await
    }

    /// gpclient authenticates through the browser, so nothing is ever needed
    async fn need_secrets(&self, _settings: Settings) -> fdo::Result<String> {
        debug!("NeedSecrets request received");
        Ok(String::new())
    }

    async fn disconnect(&self) -> fdo::Result<()> {
        info!("Disconnect request received");
        self.session.disconnect().await.map_err(fdo::Error::from)
    }

    async fn new_secrets(&self, _connection: Settings) -> fdo::Result<()> {
        debug!("NewSecrets request received");
        Ok(())
    }

    async fn set_config(&self, config: HashMap<String, OwnedValue>) -> fdo::Result<()> {
        info!("SetConfig request received");
        debug!("SetConfig: {:?}", config);
        Ok(())
    }

    async fn set_ip4_config(&self, config: HashMap<String, OwnedValue>) -> fdo::Result<()> {
        info!("SetIp4Config request received");
        debug!("SetIp4Config: {:?}", config);
        Ok(())
    }

    async fn set_ip6_config(&self, config: HashMap<String, OwnedValue>) -> fdo::Result<()> {
        info!("SetIp6Config request received");
        debug!("SetIp6Config: {:?}", config);
        Ok(())
    }

    async fn set_failure(&self, reason: String) -> fdo::Result<()> {
        warn!("SetFailure: {}", reason);
        Ok(())
    }

    #[zbus(signal, name = "StateChanged")]
    async fn vpn_state_changed(ctx: &SignalEmitter<'_>, state: u32) -> zbus::Result<()>;

    #[zbus(signal, name = "SecretsRequired")]
    async fn secrets_required(
        ctx: &SignalEmitter<'_>,
        message: &str,
        secrets: Vec<&str>,
    ) -> zbus::Result<()>;

    #[zbus(signal, name = "Config")]
    async fn config_signal(
        ctx: &SignalEmitter<'_>,
        config: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;

    #[zbus(signal, name = "Ip4Config")]
    async fn ip4_config_signal(
        ctx: &SignalEmitter<'_>,
        config: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;

    #[zbus(signal, name = "Ip6Config")]
    async fn ip6_config_signal(
        ctx: &SignalEmitter<'_>,
        config: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;

    #[zbus(signal, name = "LoginBanner")]
    async fn login_banner(ctx: &SignalEmitter<'_>, banner: &str) -> zbus::Result<()>;

    #[zbus(signal, name = "Failure")]
    async fn failure(ctx: &SignalEmitter<'_>, reason: u32) -> zbus::Result<()>;
}

impl Ip4Config {
    /// `a{sv}` payload of the `Ip4Config` signal
    pub fn to_dbus_dict(&self) -> HashMap<&'static str, Value<'_>> {
        let mut dict = HashMap::new();
        dict.insert("tundev", Value::new(self.tundev.as_str()));
        dict.insert("address", Value::new(self.address));
        dict.insert("prefix", Value::new(self.prefix));
        dict.insert("gateway", Value::new(self.gateway));

        if !self.routes.is_empty() {
            let routes: Vec<Vec<u32>> = self.routes.iter().map(|route| route.to_vec()).collect();
            dict.insert("routes", Value::from(routes));
        }

        if !self.dns.is_empty() {
            dict.insert("dns", Value::from(self.dns.clone()));
        }

        dict
    }
}

/// Claim the bus name and export the plugin object
pub async fn serve(bus_name: &str, session: Session) -> zbus::Result<Connection> {
    info!("Requesting bus name: {}", bus_name);

    connection::Builder::system()?
        .name(bus_name.to_string())?
        .serve_at(PLUGIN_PATH, VpnPlugin::new(session))?
        .build()
        .await
}

/// Turn session events into D-Bus signals until the session goes away
///
/// State changes also refresh the `State` property.
pub async fn forward_events(
    connection: Connection,
    mut events: mpsc::UnboundedReceiver<PluginEvent>,
) -> zbus::Result<()> {
    let iface_ref = connection
        .object_server()
        .interface::<_, VpnPlugin>(PLUGIN_PATH)
        .await?;

    while let Some(event) = events.recv().await {
        let emitter = iface_ref.signal_emitter();

        let result = match &event {
            PluginEvent::StateChanged(state) => {
                let sent = VpnPlugin::vpn_state_changed(emitter, state.code()).await;
                if let Err(e) = iface_ref.get().await.state_changed(emitter).await {
                    warn!("Failed to announce State property change: {}", e);
                }
                sent
            }
            PluginEvent::Ip4Config(config) => {
                VpnPlugin::ip4_config_signal(emitter, config.to_dbus_dict()).await
            }
            PluginEvent::Failure(reason) => VpnPlugin::failure(emitter, reason.code()).await,
        };

        match result {
            Ok(()) => debug!("Emitted {:?}", event),
            Err(e) => warn!("Failed to emit {:?}: {}", event, e),
        }
    }

    debug!("Plugin event stream closed");
    Ok(())
}
