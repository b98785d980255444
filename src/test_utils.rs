//! In-process stand-ins for simulators.

use crate::{
    error::SimulatorError,
    simulator::{LaunchRequest, Launcher, SimulatorHandle},
    types::IERC20,
};
use alloy::{
    primitives::{Address, B256, Bytes, ChainId, U64, U256, keccak256},
    rpc::types::TransactionRequest,
    sol_types::{SolInterface, SolValue},
};
use async_trait::async_trait;
use jsonrpsee::{
    RpcModule,
    server::{Server, ServerHandle},
    types::{ErrorObjectOwned, Params},
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    net::SocketAddr,
    sync::Arc,
};
use url::Url;

/// Wei charged for every mock transaction.
pub(crate) const MOCK_GAS_COST: u64 = 21_000_000_000_000;

/// Height the mock fork starts at.
const FORK_BLOCK: u64 = 100;

#[derive(Debug, Clone, Default)]
struct Ledger {
    balances: HashMap<Address, U256>,
    tokens: HashMap<(Address, Address), U256>,
}

#[derive(Debug, Default)]
struct NodeState {
    block_number: u64,
    ledger: Ledger,
    initial: Ledger,
    token_meta: HashMap<Address, (String, u8)>,
    impersonated: HashSet<Address>,
    impersonation_log: Vec<(Address, bool)>,
    resets: usize,
    auto_mine: bool,
    interval: Option<u64>,
    logging: Option<bool>,
    sent: usize,
    /// Senders whose transactions always fail for lack of gas money.
    starved: HashSet<Address>,
    /// Gas failures per sender.
    gas_failures: HashMap<Address, usize>,
}

type Shared = Arc<Mutex<NodeState>>;

/// A JSON-RPC server that behaves enough like a forked `anvil` for harness tests.
pub(crate) struct MockNode {
    chain_id: ChainId,
    addr: SocketAddr,
    state: Shared,
    handle: ServerHandle,
}

impl fmt::Debug for MockNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockNode").field("chain_id", &self.chain_id).field("addr", &self.addr).finish()
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        let _ = self.handle.stop();
    }
}

fn err(code: i32, message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, message.into(), None::<()>)
}

fn invalid(e: impl fmt::Display) -> ErrorObjectOwned {
    err(-32602, e.to_string())
}

fn quantity(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => u64::from_str_radix(s.trim_start_matches("0x"), 16).ok(),
        _ => None,
    }
}

impl MockNode {
    /// Starts a mock node for `chain_id` on an ephemeral port.
    pub(crate) async fn spawn(chain_id: ChainId) -> Self {
        let state: Shared = Arc::new(Mutex::new(NodeState {
            block_number: FORK_BLOCK,
            auto_mine: true,
            ..Default::default()
        }));
        let mut module = RpcModule::new(state.clone());

        module
            .register_method("eth_chainId", move |_, _, _| Ok::<_, ErrorObjectOwned>(U64::from(chain_id)))
            .unwrap();
        module
            .register_method("eth_blockNumber", |_, state: &Shared, _| {
                Ok::<_, ErrorObjectOwned>(U64::from(state.lock().block_number))
            })
            .unwrap();
        module
            .register_method("anvil_mine", |params: Params<'_>, state: &Shared, _| {
                let args: Vec<serde_json::Value> = params.parse().unwrap_or_default();
                let blocks = args.first().and_then(quantity).unwrap_or(1);
                state.lock().block_number += blocks;
                Ok::<_, ErrorObjectOwned>(())
            })
            .unwrap();
        module
            .register_method("evm_mine", |_, state: &Shared, _| {
                state.lock().block_number += 1;
                Ok::<_, ErrorObjectOwned>("0x0")
            })
            .unwrap();
        module
            .register_method("anvil_reset", |_, state: &Shared, _| {
                let mut state = state.lock();
                state.block_number = FORK_BLOCK;
                state.ledger = state.initial.clone();
                state.impersonated.clear();
                state.resets += 1;
                Ok::<_, ErrorObjectOwned>(())
            })
            .unwrap();
        module
            .register_method("anvil_setAutomine", |params: Params<'_>, state: &Shared, _| {
                let auto: bool = params.one().map_err(invalid)?;
                state.lock().auto_mine = auto;
                Ok::<_, ErrorObjectOwned>(())
            })
            .unwrap();
        module
            .register_method("anvil_setIntervalMining", |params: Params<'_>, state: &Shared, _| {
                let interval: serde_json::Value = params.one().map_err(invalid)?;
                state.lock().interval = quantity(&interval);
                Ok::<_, ErrorObjectOwned>(())
            })
            .unwrap();
        module
            .register_method("anvil_setLoggingEnabled", |params: Params<'_>, state: &Shared, _| {
                let enabled: bool = params.one().map_err(invalid)?;
                state.lock().logging = Some(enabled);
                Ok::<_, ErrorObjectOwned>(())
            })
            .unwrap();
        module
            .register_method("eth_getBalance", |params: Params<'_>, state: &Shared, _| {
                let mut seq = params.sequence();
                let address: Address = seq.next().map_err(invalid)?;
                Ok::<_, ErrorObjectOwned>(
                    state.lock().ledger.balances.get(&address).copied().unwrap_or_default(),
                )
            })
            .unwrap();
        module
            .register_method("anvil_setBalance", |params: Params<'_>, state: &Shared, _| {
                let mut seq = params.sequence();
                let address: Address = seq.next().map_err(invalid)?;
                let balance: U256 = seq.next().map_err(invalid)?;
                state.lock().ledger.balances.insert(address, balance);
                Ok::<_, ErrorObjectOwned>(())
            })
            .unwrap();
        module
            .register_method("anvil_impersonateAccount", |params: Params<'_>, state: &Shared, _| {
                let address: Address = params.one().map_err(invalid)?;
                let mut state = state.lock();
                state.impersonated.insert(address);
                state.impersonation_log.push((address, true));
                Ok::<_, ErrorObjectOwned>(())
            })
            .unwrap();
        module
            .register_method(
                "anvil_stopImpersonatingAccount",
                |params: Params<'_>, state: &Shared, _| {
                    let address: Address = params.one().map_err(invalid)?;
                    let mut state = state.lock();
                    state.impersonated.remove(&address);
                    state.impersonation_log.push((address, false));
                    Ok::<_, ErrorObjectOwned>(())
                },
            )
            .unwrap();
        module
            .register_method("eth_sendTransaction", |params: Params<'_>, state: &Shared, _| {
                let tx: TransactionRequest = params.one().map_err(invalid)?;
                send_transaction(&mut state.lock(), tx)
            })
            .unwrap();
        module
            .register_method("eth_getTransactionReceipt", |_, _, _| {
                Ok::<_, ErrorObjectOwned>(serde_json::Value::Null)
            })
            .unwrap();
        module
            .register_method("eth_call", |params: Params<'_>, state: &Shared, _| {
                let mut seq = params.sequence();
                let tx: TransactionRequest = seq.next().map_err(invalid)?;
                call(&state.lock(), tx)
            })
            .unwrap();

        let server = Server::builder().build("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.start(module);
        Self { chain_id, addr, state, handle }
    }

    /// The node's HTTP endpoint.
    pub(crate) fn url(&self) -> Url {
        format!("http://{}", self.addr).parse().unwrap()
    }

    /// The chain id the node reports.
    pub(crate) fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// The height the node is forked at.
    pub(crate) fn fork_block(&self) -> u64 {
        FORK_BLOCK
    }

    /// Number of `anvil_reset` calls served.
    pub(crate) fn resets(&self) -> usize {
        self.state.lock().resets
    }

    /// Automine flag and interval.
    pub(crate) fn mining(&self) -> (bool, Option<u64>) {
        let state = self.state.lock();
        (state.auto_mine, state.interval)
    }

    /// Last logging toggle received.
    pub(crate) fn logging(&self) -> Option<bool> {
        self.state.lock().logging
    }

    /// Native balance as of the fork block.
    pub(crate) fn set_forked_balance(&self, address: Address, balance: U256) {
        let mut state = self.state.lock();
        state.initial.balances.insert(address, balance);
        state.ledger.balances.insert(address, balance);
    }

    /// Deploys a token as of the fork block.
    pub(crate) fn add_token(&self, token: Address, symbol: &str, decimals: u8) {
        self.state.lock().token_meta.insert(token, (symbol.to_string(), decimals));
    }

    /// Token balance as of the fork block.
    pub(crate) fn set_forked_token_balance(&self, token: Address, owner: Address, amount: U256) {
        let mut state = self.state.lock();
        state.initial.tokens.insert((token, owner), amount);
        state.ledger.tokens.insert((token, owner), amount);
    }

    /// Current native balance.
    pub(crate) fn balance(&self, address: Address) -> U256 {
        self.state.lock().ledger.balances.get(&address).copied().unwrap_or_default()
    }

    /// Current token balance.
    pub(crate) fn token_balance(&self, token: Address, owner: Address) -> U256 {
        self.state.lock().ledger.tokens.get(&(token, owner)).copied().unwrap_or_default()
    }

    /// Accounts currently impersonated.
    pub(crate) fn impersonated(&self) -> HashSet<Address> {
        self.state.lock().impersonated.clone()
    }

    /// Every impersonation start (`true`) and stop (`false`) in order.
    pub(crate) fn impersonation_log(&self) -> Vec<(Address, bool)> {
        self.state.lock().impersonation_log.clone()
    }

    /// Makes every transaction from `address` fail for lack of gas money, whatever its balance.
    pub(crate) fn starve(&self, address: Address) {
        self.state.lock().starved.insert(address);
    }

    /// Number of transactions from `address` rejected for lack of gas money.
    pub(crate) fn gas_failures(&self, address: Address) -> usize {
        self.state.lock().gas_failures.get(&address).copied().unwrap_or_default()
    }

    /// Number of transactions accepted.
    pub(crate) fn transactions(&self) -> usize {
        self.state.lock().sent
    }
}

fn send_transaction(state: &mut NodeState, tx: TransactionRequest) -> Result<B256, ErrorObjectOwned> {
    let from = tx.from.ok_or_else(|| invalid("missing from"))?;
    if !state.impersonated.contains(&from) {
        return Err(err(-32000, "no Signer available"));
    }

    let value = tx.value.unwrap_or_default();
    let cost = U256::from(MOCK_GAS_COST) + value;
    let balance = state.ledger.balances.get(&from).copied().unwrap_or_default();
    if balance < cost || state.starved.contains(&from) {
        *state.gas_failures.entry(from).or_default() += 1;
        return Err(err(
            -32003,
            format!("Insufficient funds for gas * price + value: have {balance} want {cost}"),
        ));
    }

    let to = tx.to.and_then(|kind| kind.to().copied());
    let input = tx.input.input().cloned().unwrap_or_default();
    if let Some(token) = to.filter(|to| state.token_meta.contains_key(to)) {
        let Ok(IERC20::IERC20Calls::transfer(transfer)) = IERC20::IERC20Calls::abi_decode(&input)
        else {
            return Err(err(3, "execution reverted"));
        };
        let held = state.ledger.tokens.get(&(token, from)).copied().unwrap_or_default();
        if held < transfer.amount {
            return Err(err(3, "execution reverted: ERC20: transfer amount exceeds balance"));
        }
        state.ledger.tokens.insert((token, from), held - transfer.amount);
        *state.ledger.tokens.entry((token, transfer.to)).or_default() += transfer.amount;
    } else if let Some(to) = to {
        *state.ledger.balances.entry(to).or_default() += value;
    }

    state.ledger.balances.insert(from, balance - cost);
    state.sent += 1;
    if state.auto_mine {
        state.block_number += 1;
    }
    Ok(keccak256(state.sent.to_be_bytes()))
}

fn call(state: &NodeState, tx: TransactionRequest) -> Result<Bytes, ErrorObjectOwned> {
    let token = tx.to.and_then(|kind| kind.to().copied()).ok_or_else(|| invalid("missing to"))?;
    let Some((symbol, decimals)) = state.token_meta.get(&token) else {
        return Ok(Bytes::new());
    };
    let input = tx.input.input().cloned().unwrap_or_default();
    let output = match IERC20::IERC20Calls::abi_decode(&input).map_err(invalid)? {
        IERC20::IERC20Calls::balanceOf(call) => state
            .ledger
            .tokens
            .get(&(token, call.owner))
            .copied()
            .unwrap_or_default()
            .abi_encode(),
        IERC20::IERC20Calls::decimals(_) => U256::from(*decimals).abi_encode(),
        IERC20::IERC20Calls::symbol(_) => symbol.abi_encode(),
        IERC20::IERC20Calls::transfer(_) => true.abi_encode(),
    };
    Ok(output.into())
}

/// A [`Launcher`] that starts [`MockNode`]s and records what it was asked to do.
#[derive(Debug, Default)]
pub(crate) struct MockLauncher {
    nodes: Mutex<HashMap<ChainId, Arc<MockNode>>>,
    launches: Mutex<Vec<LaunchRequest>>,
    failing: Mutex<HashSet<ChainId>>,
}

impl MockLauncher {
    /// Makes every launch for `chain_id` fail.
    pub(crate) fn fail_on(&self, chain_id: ChainId) {
        self.failing.lock().insert(chain_id);
    }

    /// Lets launches for `chain_id` succeed again.
    pub(crate) fn recover(&self, chain_id: ChainId) {
        self.failing.lock().remove(&chain_id);
    }

    /// The node most recently launched for `chain_id`.
    pub(crate) fn node(&self, chain_id: ChainId) -> Option<Arc<MockNode>> {
        self.nodes.lock().get(&chain_id).cloned()
    }

    /// Chains launched so far, in order.
    pub(crate) fn launches(&self) -> Vec<ChainId> {
        self.launches.lock().iter().map(|request| request.chain_id).collect()
    }

    /// Ports requested so far, in order.
    pub(crate) fn ports(&self) -> Vec<u16> {
        self.launches.lock().iter().map(|request| request.port).collect()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<SimulatorHandle, SimulatorError> {
        let chain_id = request.chain_id;
        self.launches.lock().push(request);
        if self.failing.lock().contains(&chain_id) {
            return Err(SimulatorError::Spawn { chain_id, reason: "address already in use".into() });
        }

        let node = Arc::new(MockNode::spawn(chain_id).await);
        let handle = SimulatorHandle::new(chain_id, node.url(), None);
        self.nodes.lock().insert(chain_id, node);
        Ok(handle)
    }
}
