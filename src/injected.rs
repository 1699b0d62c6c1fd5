//! `window.ethereum` as a [`WalletProvider`].

use std::rc::Rc;

use async_trait::async_trait;
use ethers::types::Address;
use futures::{
    future::LocalFutureObj,
    task::{LocalSpawn, SpawnError},
};
use gloo_utils::errors::JsError;
use js_sys::{Function, Promise, Reflect};
use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use super::{
    chain::{ChainId, NetworkDescriptor},
    config::ConnectionConfig,
    connection::ConnectionManager,
    event::Event,
    provider::{
        Listener, ProviderError, ProviderEvent, ProviderEventKind, SignerHandle, WalletProvider,
        UNAUTHORIZED,
    },
    subscription::Subscription,
};

#[derive(Serialize)]
struct RequestArguments<'a, P: Serialize> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<P>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwitchChainParameter {
    chain_id: ChainId,
}

/// Runs spawned tasks on the browser microtask queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasmSpawner;

impl LocalSpawn for WasmSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        wasm_bindgen_futures::spawn_local(future);
        Ok(())
    }
}

pub struct InjectedProvider {
    ethereum: JsValue,
}

impl InjectedProvider {
    /// Looks up `ethereum` on the global object.
    pub fn detect() -> Option<Rc<Self>> {
        let ethereum = Reflect::get(&js_sys::global(), &JsValue::from_str("ethereum")).ok()?;
        if ethereum.is_undefined() || ethereum.is_null() {
            return None;
        }
        Some(Rc::new(Self { ethereum }))
    }

    fn function(&self, name: &str) -> Result<Function, ProviderError> {
        Reflect::get(&self.ethereum, &JsValue::from_str(name))
            .ok()
            .and_then(|value| value.dyn_into::<Function>().ok())
            .ok_or_else(|| ProviderError::internal(format!("ethereum.{name} is not a function")))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, ProviderError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        debug!("ethereum.request {method}");
        let arguments = serde_wasm_bindgen::to_value(&RequestArguments { method, params })
            .map_err(|err| ProviderError::internal(err.to_string()))?;
        let pending =
            self.function("request")?.call1(&self.ethereum, &arguments).map_err(provider_error)?;
        let result =
            JsFuture::from(Promise::resolve(&pending)).await.map_err(provider_error)?;
        serde_wasm_bindgen::from_value(result)
            .map_err(|err| ProviderError::internal(format!("{method}: {err}")))
    }
}

/// Wallet rejections carry `{code, message}`; `message` is usually a
/// non-enumerable `Error` property, so fields are read one by one.
fn provider_error(value: JsValue) -> ProviderError {
    let field = |name: &str| Reflect::get(&value, &JsValue::from_str(name)).ok();
    if let Some(code) = field("code").and_then(|code| code.as_f64()) {
        let message = field("message").and_then(|message| message.as_string()).unwrap_or_default();
        let mut err = ProviderError::new(code as i64, message);
        err.data = field("data")
            .filter(|data| !data.is_undefined())
            .and_then(|data| serde_wasm_bindgen::from_value(data).ok());
        return err;
    }
    match JsError::try_from(value) {
        Ok(err) => ProviderError::internal(err.to_string()),
        Err(err) => ProviderError::internal(err.to_string()),
    }
}

fn decode_event(kind: ProviderEventKind, value: JsValue) -> Result<ProviderEvent, ProviderError> {
    let invalid = |err: serde_wasm_bindgen::Error| {
        ProviderError::internal(format!("bad {} payload: {err}", kind.as_str()))
    };
    Ok(match kind {
        ProviderEventKind::AccountsChanged => {
            ProviderEvent::AccountsChanged(serde_wasm_bindgen::from_value(value).map_err(invalid)?)
        }
        ProviderEventKind::ChainChanged => {
            ProviderEvent::ChainChanged(serde_wasm_bindgen::from_value(value).map_err(invalid)?)
        }
        ProviderEventKind::Disconnect => ProviderEvent::Disconnect,
    })
}

#[async_trait(?Send)]
impl WalletProvider for InjectedProvider {
    async fn chain_id(&self) -> Result<String, ProviderError> {
        self.request::<(), _>("eth_chainId", None).await
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), ProviderError> {
        self.request::<_, ()>(
            "wallet_switchEthereumChain",
            Some([SwitchChainParameter { chain_id }]),
        )
        .await
    }

    async fn add_chain(&self, network: &NetworkDescriptor) -> Result<(), ProviderError> {
        self.request::<_, ()>("wallet_addEthereumChain", Some([network])).await
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.request::<(), _>("eth_requestAccounts", None).await
    }

    async fn accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.request::<(), _>("eth_accounts", None).await
    }

    async fn network(&self) -> Result<ChainId, ProviderError> {
        let chain_id = self.chain_id().await?;
        chain_id.parse::<ChainId>().map_err(|err| ProviderError::internal(format!("{chain_id}: {err}")))
    }

    async fn signer(&self) -> Result<SignerHandle, ProviderError> {
        let address = self
            .accounts()
            .await?
            .first()
            .copied()
            .ok_or_else(|| ProviderError::new(UNAUTHORIZED, "no authorized account"))?;
        Ok(SignerHandle { address, chain_id: self.network().await? })
    }

    fn subscribe(&self, kind: ProviderEventKind, listener: Listener) -> Subscription {
        let callback = Closure::<dyn FnMut(JsValue)>::new(move |value: JsValue| {
            match decode_event(kind, value) {
                Ok(event) => listener(event),
                Err(err) => warn!("Dropping wallet event: {err}"),
            }
        });
        let name = JsValue::from_str(kind.as_str());

        let registered = self
            .function("on")
            .and_then(|on| on.call2(&self.ethereum, &name, callback.as_ref()).map_err(provider_error));
        if let Err(err) = registered {
            warn!("Could not register {} handler: {err}", kind.as_str());
            return Subscription::empty();
        }

        let ethereum = self.ethereum.clone();
        Subscription::new(move || {
            let remove = Reflect::get(&ethereum, &JsValue::from_str("removeListener"))
                .ok()
                .and_then(|value| value.dyn_into::<Function>().ok());
            match remove {
                Some(remove) => {
                    if let Err(err) = remove.call2(&ethereum, &name, callback.as_ref()) {
                        warn!("removeListener failed: {}", provider_error(err));
                    }
                }
                None => warn!("ethereum.removeListener is not a function"),
            }
            drop(callback);
        })
    }
}

/// A manager bound to the page's injected wallet, if there is one.
pub fn connection_manager(
    config: ConnectionConfig,
    listener: Option<Box<dyn Fn(Event)>>,
) -> ConnectionManager {
    let provider = InjectedProvider::detect().map(|provider| provider as Rc<dyn WalletProvider>);
    ConnectionManager::new(provider, config, Rc::new(WasmSpawner), listener)
}
