use std::collections::HashSet;

use serde::Serialize;

use super::{decimal, HeuristicError};
use crate::models::TransactionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorCategory {
    TokenTransfer,
    TokenApproval,
    TokenSwap,
    LiquidityProvision,
    LiquidityRemoval,
    FlashLoan,
    NftTransfer,
    Multicall,
    Wrap,
    Unwrap,
}

impl SelectorCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::TokenTransfer => "Token Transfer",
            Self::TokenApproval => "Token Approval",
            Self::TokenSwap => "Token Swap",
            Self::LiquidityProvision => "Liquidity Provision",
            Self::LiquidityRemoval => "Liquidity Removal",
            Self::FlashLoan => "Flash Loan",
            Self::NftTransfer => "NFT Transfer",
            Self::Multicall => "Multicall",
            Self::Wrap => "Wrap",
            Self::Unwrap => "Unwrap",
        }
    }
}

#[derive(Debug)]
pub struct KnownSelector {
    pub selector: &'static str,
    pub function: &'static str,
    pub category: SelectorCategory,
}

const fn known(
    selector: &'static str,
    function: &'static str,
    category: SelectorCategory,
) -> KnownSelector {
    KnownSelector {
        selector,
        function,
        category,
    }
}

pub const KNOWN_SELECTORS: &[KnownSelector] = &[
    known("0xa9059cbb", "transfer(address,uint256)", SelectorCategory::TokenTransfer),
    known("0x23b872dd", "transferFrom(address,address,uint256)", SelectorCategory::TokenTransfer),
    known("0x095ea7b3", "approve(address,uint256)", SelectorCategory::TokenApproval),
    known(
        "0x38ed1739",
        "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)",
        SelectorCategory::TokenSwap,
    ),
    known(
        "0x8803dbee",
        "swapTokensForExactTokens(uint256,uint256,address[],address,uint256)",
        SelectorCategory::TokenSwap,
    ),
    known(
        "0x7ff36ab5",
        "swapExactETHForTokens(uint256,address[],address,uint256)",
        SelectorCategory::TokenSwap,
    ),
    known(
        "0x18cbafe5",
        "swapExactTokensForETH(uint256,uint256,address[],address,uint256)",
        SelectorCategory::TokenSwap,
    ),
    known("0x414bf389", "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))", SelectorCategory::TokenSwap),
    known("0xc04b8d59", "exactInput((bytes,address,uint256,uint256,uint256))", SelectorCategory::TokenSwap),
    known("0x3593564c", "execute(bytes,bytes[],uint256)", SelectorCategory::TokenSwap),
    known(
        "0xe8e33700",
        "addLiquidity(address,address,uint256,uint256,uint256,uint256,address,uint256)",
        SelectorCategory::LiquidityProvision,
    ),
    known(
        "0xf305d719",
        "addLiquidityETH(address,uint256,uint256,uint256,address,uint256)",
        SelectorCategory::LiquidityProvision,
    ),
    known(
        "0xbaa2abde",
        "removeLiquidity(address,address,uint256,uint256,uint256,address,uint256)",
        SelectorCategory::LiquidityRemoval,
    ),
    known(
        "0x02751cec",
        "removeLiquidityETH(address,uint256,uint256,uint256,address,uint256)",
        SelectorCategory::LiquidityRemoval,
    ),
    known(
        "0xab9c4b5d",
        "flashLoan(address,address[],uint256[],uint256[],address,bytes,uint16)",
        SelectorCategory::FlashLoan,
    ),
    known("0x5cffe9de", "flashLoan(address,address,uint256,bytes)", SelectorCategory::FlashLoan),
    known(
        "0x42842e0e",
        "safeTransferFrom(address,address,uint256)",
        SelectorCategory::NftTransfer,
    ),
    known("0xac9650d8", "multicall(bytes[])", SelectorCategory::Multicall),
    known("0x5ae401dc", "multicall(uint256,bytes[])", SelectorCategory::Multicall),
    known("0xd0e30db0", "deposit()", SelectorCategory::Wrap),
    known("0x2e1a7d4d", "withdraw(uint256)", SelectorCategory::Unwrap),
];

pub fn lookup_selector(selector: &str) -> Option<&'static KnownSelector> {
    KNOWN_SELECTORS
        .iter()
        .find(|k| k.selector.eq_ignore_ascii_case(selector))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub primary_type: String,
    pub function_name: Option<String>,
    pub selector: Option<String>,
    pub transfer_count: usize,
    pub token_count: usize,
    pub interaction_count: usize,
    pub log_count: usize,
    pub is_contract_interaction: bool,
}

impl Classification {
    /// Used when classification cannot be computed.
    pub fn neutral() -> Self {
        Self {
            primary_type: "Unknown".to_string(),
            function_name: None,
            selector: None,
            transfer_count: 0,
            token_count: 0,
            interaction_count: 0,
            log_count: 0,
            is_contract_interaction: false,
        }
    }

    pub fn category(&self) -> Option<SelectorCategory> {
        self.selector
            .as_deref()
            .and_then(lookup_selector)
            .map(|k| k.category)
    }
}

pub fn classify(tx: &TransactionRecord) -> Result<Classification, HeuristicError> {
    let value = decimal("value", &tx.value)?;
    let transfers = &tx.context.token_transfers;

    let transfer_count = transfers.len() + usize::from(!value.is_zero());
    let token_count = transfers
        .iter()
        .map(|t| t.token_address.to_lowercase())
        .collect::<HashSet<_>>()
        .len();

    let is_contract_interaction = tx.metrics.is_contract_interaction || tx.has_input();
    let mut contracts: HashSet<String> = transfers
        .iter()
        .map(|t| t.token_address.to_lowercase())
        .chain(tx.context.logs.iter().map(|l| l.address.to_lowercase()))
        .collect();
    if is_contract_interaction {
        if let Some(to) = &tx.to {
            contracts.insert(to.to_lowercase());
        }
    }

    let selector = tx.selector();
    let known = selector.as_deref().and_then(lookup_selector);

    let primary_type = if tx.to.is_none() {
        "Contract Deployment"
    } else if !tx.has_input() {
        "Simple Transfer"
    } else if let Some(k) = known {
        k.category.label()
    } else if transfers.len() > 2 {
        "Complex DeFi Interaction"
    } else if !transfers.is_empty() {
        "Token Interaction"
    } else {
        "Contract Interaction"
    };

    Ok(Classification {
        primary_type: primary_type.to_string(),
        function_name: known.map(|k| k.function.to_string()),
        selector,
        transfer_count,
        token_count,
        interaction_count: contracts.len(),
        log_count: tx.context.logs.len(),
        is_contract_interaction,
    })
}
