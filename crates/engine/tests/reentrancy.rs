//! Re-entrant withdrawal attempts driven through asset receiver hooks.

use alloy_primitives::{Address, U256};
use std::cell::Cell;
use std::rc::{Rc, Weak};
use treasury_assets::{
    Erc20, Erc20Recipient, Erc721, Erc721Receiver, MemoryErc20, MemoryErc721, ERC721_RECEIVED,
};
use treasury_core::{AssetError, AssetResult, TreasuryError};
use treasury_engine::attacker::{ReentrantWithdrawer, ReentryTarget};
use treasury_engine::scenario::Outcome;
use treasury_engine::{run, Scenario, Treasury};

const ADMIN: Address = Address::with_last_byte(0x01);
const USER: Address = Address::with_last_byte(0x02);
const ATTACKER: Address = Address::with_last_byte(0x66);
const ACCOMPLICE: Address = Address::with_last_byte(0x67);
const TREASURY: Address = Address::with_last_byte(0xf0);

struct Fixture {
    treasury: Rc<Treasury>,
    erc20: Rc<MemoryErc20>,
    erc721: Rc<MemoryErc721>,
}

/// USER and ATTACKER each deposit 100 TT; ATTACKER also deposits NFT #1.
/// Both assets are enabled.
fn deploy() -> Fixture {
    let f = Fixture {
        treasury: Rc::new(Treasury::new(TREASURY, ADMIN)),
        erc20: Rc::new(MemoryErc20::new(Address::with_last_byte(0xee), "Test Token", "TT", 18)),
        erc721: Rc::new(MemoryErc721::new(Address::with_last_byte(0xaa), "Test NFT", "TNFT")),
    };
    for who in [USER, ATTACKER] {
        f.erc20.mint(who, U256::from(100)).unwrap();
        f.erc20.approve(who, TREASURY, U256::from(100));
        f.treasury
            .deposit_erc20(who, f.erc20.as_ref(), U256::from(100))
            .unwrap();
    }
    let id = f.erc721.safe_mint(ATTACKER).unwrap();
    f.erc721.approve(ATTACKER, TREASURY, id).unwrap();
    f.treasury
        .deposit_erc721(ATTACKER, f.erc721.as_ref(), id)
        .unwrap();

    f.treasury.enable_token(ADMIN, f.erc20.address(), true).unwrap();
    f.treasury.enable_token(ADMIN, f.erc721.address(), true).unwrap();
    f.treasury.take_events();
    f
}

fn arm_erc20(f: &Fixture, amount: u64, propagate: bool) -> Rc<ReentrantWithdrawer> {
    let token: Weak<dyn Erc20> = Rc::downgrade(&f.erc20) as Weak<dyn Erc20>;
    let attacker = Rc::new(
        ReentrantWithdrawer::new(
            Rc::clone(&f.treasury),
            ATTACKER,
            ReentryTarget::Erc20 {
                asset: token,
                amount: U256::from(amount),
            },
        )
        .propagating(propagate),
    );
    f.erc20.register_recipient(ATTACKER, attacker.clone());
    attacker
}

#[test]
fn nested_erc20_withdrawal_is_rejected() {
    let f = deploy();
    let attacker = arm_erc20(&f, 100, false);

    f.treasury
        .withdraw_erc20(ATTACKER, f.erc20.as_ref(), U256::from(100))
        .unwrap();

    let attempts = attacker.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].result, Err(TreasuryError::ReentrantCall));
    assert!(attempts[0].locked);
    // The debit was committed before the push.
    assert_eq!(attempts[0].erc20_balance, U256::ZERO);

    assert_eq!(
        f.treasury.erc20_deposits(ATTACKER, f.erc20.address()),
        U256::ZERO
    );
    assert_eq!(f.treasury.erc20_deposits(USER, f.erc20.address()), U256::from(100));
    assert_eq!(f.erc20.balance_of(ATTACKER), U256::from(100));
    assert_eq!(f.erc20.balance_of(TREASURY), U256::from(100));
    assert!(!f.treasury.is_locked());
}

#[test]
fn propagated_rejection_rolls_back_the_whole_withdrawal() {
    let f = deploy();
    let attacker = arm_erc20(&f, 50, true);

    let err = f
        .treasury
        .withdraw_erc20(ATTACKER, f.erc20.as_ref(), U256::from(50))
        .unwrap_err();

    match err {
        TreasuryError::TransferFailed { asset, reason } => {
            assert_eq!(asset, f.erc20.address());
            assert_eq!(reason, "Reentrant call");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(attacker.attempts().len(), 1);
    assert_eq!(
        f.treasury.erc20_deposits(ATTACKER, f.erc20.address()),
        U256::from(100)
    );
    assert_eq!(f.erc20.balance_of(TREASURY), U256::from(200));
    assert_eq!(f.erc20.balance_of(ATTACKER), U256::ZERO);
    assert!(f.treasury.take_events().is_empty());
    assert!(!f.treasury.is_locked());
}

#[test]
fn every_push_triggers_a_fresh_rejected_attempt() {
    let f = deploy();
    let attacker = arm_erc20(&f, 10, false);

    for _ in 0..3 {
        f.treasury
            .withdraw_erc20(ATTACKER, f.erc20.as_ref(), U256::from(10))
            .unwrap();
    }

    let attempts = attacker.attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts
        .iter()
        .all(|a| a.result == Err(TreasuryError::ReentrantCall)));
    assert_eq!(
        f.treasury.erc20_deposits(ATTACKER, f.erc20.address()),
        U256::from(70)
    );

    let records = attacker.records();
    assert!(records.iter().all(|r| r.rejected && r.account == ATTACKER));
    assert_eq!(records[0].error.as_deref(), Some("Reentrant call"));
}

#[test]
fn nested_erc721_withdrawal_is_rejected() {
    let f = deploy();
    let nft: Weak<dyn Erc721> = Rc::downgrade(&f.erc721) as Weak<dyn Erc721>;
    let attacker = Rc::new(ReentrantWithdrawer::new(
        Rc::clone(&f.treasury),
        ATTACKER,
        ReentryTarget::Erc721 {
            asset: nft,
            token_id: U256::from(1),
        },
    ));
    f.erc721.register_receiver(ATTACKER, attacker.clone());

    f.treasury
        .withdraw_erc721(ATTACKER, f.erc721.as_ref(), U256::from(1))
        .unwrap();

    let attempts = attacker.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].result, Err(TreasuryError::ReentrantCall));
    assert_eq!(attempts[0].erc721_holding, None);
    assert_eq!(f.erc721.owner_of(U256::from(1)).unwrap(), ATTACKER);
    assert_eq!(f.treasury.erc721_deposits(ATTACKER, f.erc721.address()), None);
}

#[test]
fn cross_asset_reentry_is_rejected() {
    let f = deploy();
    let nft: Weak<dyn Erc721> = Rc::downgrade(&f.erc721) as Weak<dyn Erc721>;
    let attacker = Rc::new(ReentrantWithdrawer::new(
        Rc::clone(&f.treasury),
        ATTACKER,
        ReentryTarget::Erc721 {
            asset: nft,
            token_id: U256::from(1),
        },
    ));
    // Hooked on the fungible token, targeting the NFT.
    f.erc20.register_recipient(ATTACKER, attacker.clone());

    f.treasury
        .withdraw_erc20(ATTACKER, f.erc20.as_ref(), U256::from(40))
        .unwrap();

    assert_eq!(
        attacker.attempts()[0].result,
        Err(TreasuryError::ReentrantCall)
    );
    assert_eq!(
        f.treasury.erc721_deposits(ATTACKER, f.erc721.address()),
        Some(U256::from(1))
    );
    assert_eq!(f.erc721.owner_of(U256::from(1)).unwrap(), TREASURY);
}

/// Deposits whatever it receives straight back into the treasury, then
/// optionally refuses the transfer.
struct Redepositor {
    treasury: Rc<Treasury>,
    token: Weak<MemoryErc20>,
    account: Address,
    refuse: bool,
}

impl Erc20Recipient for Redepositor {
    fn on_tokens_received(&self, _: Address, from: Address, amount: U256) -> AssetResult<()> {
        if from != self.treasury.address() {
            return Ok(());
        }
        let Some(token) = self.token.upgrade() else {
            return Ok(());
        };
        assert!(self.treasury.is_locked());
        self.treasury
            .deposit_erc20(self.account, token.as_ref(), amount)?;
        if self.refuse {
            return Err(AssetError::Reverted("refused".into()));
        }
        Ok(())
    }
}

#[test]
fn deposits_are_not_guarded() {
    let f = deploy();
    f.erc20.approve(ATTACKER, TREASURY, U256::MAX);
    f.erc20.register_recipient(
        ATTACKER,
        Rc::new(Redepositor {
            treasury: Rc::clone(&f.treasury),
            token: Rc::downgrade(&f.erc20),
            account: ATTACKER,
            refuse: false,
        }),
    );

    f.treasury
        .withdraw_erc20(ATTACKER, f.erc20.as_ref(), U256::from(30))
        .unwrap();

    assert_eq!(
        f.treasury.erc20_deposits(ATTACKER, f.erc20.address()),
        U256::from(100)
    );
    assert_eq!(f.erc20.balance_of(TREASURY), U256::from(200));
    let names: Vec<&str> = f.treasury.take_events().iter().map(|e| e.name()).collect();
    assert_eq!(names, ["erc20_deposited", "erc20_withdrawn"]);
}

#[test]
fn refused_push_discards_nested_deposit() {
    let f = deploy();
    f.erc20.approve(ATTACKER, TREASURY, U256::MAX);
    f.erc20.register_recipient(
        ATTACKER,
        Rc::new(Redepositor {
            treasury: Rc::clone(&f.treasury),
            token: Rc::downgrade(&f.erc20),
            account: ATTACKER,
            refuse: true,
        }),
    );

    let err = f
        .treasury
        .withdraw_erc20(ATTACKER, f.erc20.as_ref(), U256::from(30))
        .unwrap_err();

    assert!(matches!(err, TreasuryError::TransferFailed { .. }));
    assert_eq!(
        f.treasury.erc20_deposits(ATTACKER, f.erc20.address()),
        U256::from(100)
    );
    assert_eq!(f.erc20.balance_of(TREASURY), U256::from(200));
    assert_eq!(f.erc20.balance_of(ATTACKER), U256::ZERO);
    assert!(f.treasury.take_events().is_empty());
    assert!(!f.treasury.is_locked());
}

/// Forwards what it receives to an accomplice, then refuses while `refuse`
/// is set.
struct Siphon {
    token: Weak<MemoryErc20>,
    account: Address,
    refuse: Cell<bool>,
}

impl Erc20Recipient for Siphon {
    fn on_tokens_received(&self, _: Address, from: Address, amount: U256) -> AssetResult<()> {
        if from != TREASURY {
            return Ok(());
        }
        if let Some(token) = self.token.upgrade() {
            token.transfer(self.account, ACCOMPLICE, amount)?;
        }
        if self.refuse.get() {
            return Err(AssetError::Reverted("refused".into()));
        }
        Ok(())
    }
}

#[test]
fn siphon_then_refuse_cannot_extract_twice() {
    let f = deploy();
    let siphon = Rc::new(Siphon {
        token: Rc::downgrade(&f.erc20),
        account: ATTACKER,
        refuse: Cell::new(true),
    });
    f.erc20.register_recipient(ATTACKER, siphon.clone());

    let err = f
        .treasury
        .withdraw_erc20(ATTACKER, f.erc20.as_ref(), U256::from(100))
        .unwrap_err();
    assert!(matches!(err, TreasuryError::TransferFailed { .. }));
    assert_eq!(
        f.treasury.erc20_deposits(ATTACKER, f.erc20.address()),
        U256::from(100)
    );
    assert_eq!(f.erc20.balance_of(TREASURY), U256::from(200));
    assert_eq!(f.erc20.balance_of(ACCOMPLICE), U256::ZERO);

    siphon.refuse.set(false);
    f.treasury
        .withdraw_erc20(ATTACKER, f.erc20.as_ref(), U256::from(100))
        .unwrap();

    let extracted = f.erc20.balance_of(ATTACKER) + f.erc20.balance_of(ACCOMPLICE);
    assert_eq!(extracted, U256::from(100));
    assert_eq!(f.erc20.balance_of(TREASURY), U256::from(100));
    assert_eq!(
        f.treasury.erc20_deposits(ATTACKER, f.erc20.address()),
        U256::ZERO
    );
    assert_eq!(
        extracted + f.erc20.balance_of(TREASURY) + f.erc20.balance_of(USER),
        f.erc20.total_supply()
    );
}

/// On receiving a unit back from the treasury, deposits `replacement` into
/// the same slot and then refuses the transfer.
struct SlotRefiller {
    treasury: Rc<Treasury>,
    nft: Weak<MemoryErc721>,
    account: Address,
    replacement: U256,
}

impl Erc721Receiver for SlotRefiller {
    fn on_erc721_received(
        &self,
        _: Address,
        from: Address,
        _: U256,
        _: &[u8],
    ) -> AssetResult<[u8; 4]> {
        if from != self.treasury.address() {
            return Ok(ERC721_RECEIVED);
        }
        if let Some(nft) = self.nft.upgrade() {
            self.treasury
                .deposit_erc721(self.account, nft.as_ref(), self.replacement)?;
        }
        Err(AssetError::Reverted("refused".into()))
    }
}

#[test]
fn refused_erc721_push_restores_the_original_holding() {
    let f = deploy();
    let replacement = f.erc721.safe_mint(ATTACKER).unwrap();
    f.erc721.approve(ATTACKER, TREASURY, replacement).unwrap();
    f.erc721.register_receiver(
        ATTACKER,
        Rc::new(SlotRefiller {
            treasury: Rc::clone(&f.treasury),
            nft: Rc::downgrade(&f.erc721),
            account: ATTACKER,
            replacement,
        }),
    );

    let err = f
        .treasury
        .withdraw_erc721(ATTACKER, f.erc721.as_ref(), U256::from(1))
        .unwrap_err();

    assert!(matches!(err, TreasuryError::TransferFailed { .. }));
    assert_eq!(
        f.treasury.erc721_deposits(ATTACKER, f.erc721.address()),
        Some(U256::from(1))
    );
    assert_eq!(f.erc721.owner_of(U256::from(1)).unwrap(), TREASURY);
    assert_eq!(f.erc721.owner_of(replacement).unwrap(), ATTACKER);
    assert_eq!(f.erc721.get_approved(replacement).unwrap(), Some(TREASURY));
    assert!(f.treasury.take_events().is_empty());
    assert!(!f.treasury.is_locked());
}

#[test]
fn reentrancy_demo_passes() {
    let scenario = Scenario::from_json(include_str!("../../../demos/reentrancy.json")).unwrap();
    let outcome = run(&scenario).unwrap();

    assert!(outcome.passed(), "{:#?}", outcome.steps);
    assert!(!outcome.reentry.is_empty());
    assert!(outcome.reentry.iter().all(|r| r.rejected));
    assert!(outcome
        .steps
        .iter()
        .any(|s| s.outcome == Outcome::TransferFailed));
}

#[test]
fn treasury_demo_passes() {
    let scenario = Scenario::from_json(include_str!("../../../demos/treasury.json")).unwrap();
    let outcome = run(&scenario).unwrap();

    assert!(outcome.passed(), "{:#?}", outcome.steps);
    assert!(outcome.reentry.is_empty());
}
