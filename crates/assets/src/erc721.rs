//! In-memory ERC-721 with approvals, sequential minting, and receiver hooks.

use crate::{Erc721, Erc721Receiver, FailureMode, ERC721_RECEIVED};
use alloy_primitives::{Address, U256};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use treasury_core::{AssetError, AssetResult};

#[derive(Debug, Clone)]
struct Registry {
    owners: HashMap<U256, Address>,
    approvals: HashMap<U256, Address>,
    operators: HashMap<(Address, Address), bool>,
    next_id: U256,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            owners: HashMap::new(),
            approvals: HashMap::new(),
            operators: HashMap::new(),
            // `safe_mint` hands out 1, 2, 3, ...
            next_id: U256::from(1),
        }
    }
}

impl Registry {
    fn owner(&self, token_id: U256) -> AssetResult<Address> {
        self.owners
            .get(&token_id)
            .copied()
            .ok_or(AssetError::NonexistentToken(token_id))
    }

    fn is_authorized(&self, operator: Address, owner: Address, token_id: U256) -> bool {
        operator == owner
            || self.approvals.get(&token_id) == Some(&operator)
            || self
                .operators
                .get(&(owner, operator))
                .copied()
                .unwrap_or(false)
    }
}

/// Non-fungible token held entirely in memory.
pub struct MemoryErc721 {
    address: Address,
    name: String,
    symbol: String,
    registry: RefCell<Registry>,
    receivers: RefCell<HashMap<Address, Rc<dyn Erc721Receiver>>>,
    failure: Cell<Option<FailureMode>>,
}

impl MemoryErc721 {
    pub fn new(address: Address, name: &str, symbol: &str) -> Self {
        Self {
            address,
            name: name.to_string(),
            symbol: symbol.to_string(),
            registry: RefCell::new(Registry::default()),
            receivers: RefCell::new(HashMap::new()),
            failure: Cell::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mint(&self, to: Address, token_id: U256) -> AssetResult<()> {
        if to == Address::ZERO {
            return Err(AssetError::InvalidReceiver);
        }
        let mut registry = self.registry.borrow_mut();
        if registry.owners.contains_key(&token_id) {
            return Err(AssetError::AlreadyMinted(token_id));
        }
        registry.owners.insert(token_id, to);
        if token_id >= registry.next_id {
            registry.next_id = token_id.saturating_add(U256::from(1));
        }
        tracing::debug!(token = %self.address, %to, %token_id, "mint");
        Ok(())
    }

    /// Mints the next sequential id and runs the receiver check.
    pub fn safe_mint(&self, to: Address) -> AssetResult<U256> {
        let token_id = self.registry.borrow().next_id;
        self.reverting(|| {
            self.mint(to, token_id)?;
            self.check_receiver(Address::ZERO, Address::ZERO, to, token_id, &[])
        })?;
        Ok(token_id)
    }

    /// `caller` must own the token or be an approved operator for its owner.
    pub fn approve(&self, caller: Address, approved: Address, token_id: U256) -> AssetResult<()> {
        let mut registry = self.registry.borrow_mut();
        let owner = registry.owner(token_id)?;
        let is_operator = registry
            .operators
            .get(&(owner, caller))
            .copied()
            .unwrap_or(false);
        if caller != owner && !is_operator {
            return Err(AssetError::NotAuthorized);
        }
        registry.approvals.insert(token_id, approved);
        Ok(())
    }

    pub fn get_approved(&self, token_id: U256) -> AssetResult<Option<Address>> {
        let registry = self.registry.borrow();
        registry.owner(token_id)?;
        Ok(registry.approvals.get(&token_id).copied())
    }

    pub fn set_approval_for_all(&self, owner: Address, operator: Address, approved: bool) {
        self.registry
            .borrow_mut()
            .operators
            .insert((owner, operator), approved);
    }

    pub fn register_receiver(&self, account: Address, hook: Rc<dyn Erc721Receiver>) {
        self.receivers.borrow_mut().insert(account, hook);
    }

    pub fn set_failure(&self, mode: Option<FailureMode>) {
        self.failure.set(mode);
    }

    fn move_token(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        token_id: U256,
    ) -> AssetResult<()> {
        if self.failure.get().is_some() {
            return Err(AssetError::Reverted("token paused".into()));
        }
        if to == Address::ZERO {
            return Err(AssetError::InvalidReceiver);
        }
        let mut registry = self.registry.borrow_mut();
        let owner = registry.owner(token_id)?;
        if owner != from || !registry.is_authorized(operator, owner, token_id) {
            return Err(AssetError::NotAuthorized);
        }
        registry.approvals.remove(&token_id);
        registry.owners.insert(token_id, to);
        Ok(())
    }

    /// Runs `call`; on `Err` ownership and approvals go back to what they
    /// were before, including changes made by nested calls from a hook.
    fn reverting<T>(&self, call: impl FnOnce() -> AssetResult<T>) -> AssetResult<T> {
        let checkpoint = self.registry.borrow().clone();
        let result = call();
        if result.is_err() {
            *self.registry.borrow_mut() = checkpoint;
        }
        result
    }

    /// Runs the recipient's hook, if it registered one, with no borrow held.
    fn check_receiver(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        token_id: U256,
        data: &[u8],
    ) -> AssetResult<()> {
        let hook = self.receivers.borrow().get(&to).cloned();
        let Some(hook) = hook else {
            return Ok(());
        };
        let selector = hook.on_erc721_received(operator, from, token_id, data)?;
        if selector != ERC721_RECEIVED {
            tracing::debug!(
                token = %self.address,
                %to,
                selector = %format!("0x{}", hex::encode(selector)),
                "receiver returned wrong selector"
            );
            return Err(AssetError::InvalidReceiver);
        }
        Ok(())
    }
}

impl Erc721 for MemoryErc721 {
    fn address(&self) -> Address {
        self.address
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn owner_of(&self, token_id: U256) -> AssetResult<Address> {
        self.registry.borrow().owner(token_id)
    }

    fn transfer_from(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        token_id: U256,
    ) -> AssetResult<()> {
        self.move_token(operator, from, to, token_id)?;
        tracing::debug!(token = %self.address, %operator, %from, %to, %token_id, "transfer_from");
        Ok(())
    }

    fn safe_transfer_from(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        token_id: U256,
        data: &[u8],
    ) -> AssetResult<()> {
        self.reverting(|| {
            self.move_token(operator, from, to, token_id)?;
            self.check_receiver(operator, from, to, token_id, data)
        })?;
        tracing::debug!(token = %self.address, %operator, %from, %to, %token_id, "safe_transfer_from");
        Ok(())
    }
}
