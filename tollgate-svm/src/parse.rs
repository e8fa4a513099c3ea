//! Normalization of parsed RPC transactions.
//!
//! `getTransaction` with the `jsonParsed` encoding returns instructions the
//! RPC node already decoded into `{program, type, info}` JSON. This module
//! walks that shape once and produces a [`LedgerTransaction`] carrying tagged
//! [`TransferInstruction`]s plus the account keys and balance snapshots the
//! escrow deposit check reads. Recognized transfers:
//!
//! - `spl-token` `transferChecked` - amount from `tokenAmount.uiAmountString`,
//!   mint recorded
//! - `spl-token` `transfer` - base-unit amount scaled at native decimals; the
//!   unchecked form does not name its mint
//! - `system` `transfer` - lamports
//!
//! Anything else (memos, compute budget, partially decoded instructions) is
//! skipped, never an error.

use serde_json::Value;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiInstruction, UiMessage,
    UiParsedInstruction,
};
use tollgate::amount::Amount;
use tollgate::ledger::{LedgerError, LedgerTransaction, TransferInstruction};
use tollgate::timestamp::UnixTimestamp;

/// Converts a fetched parsed transaction into a [`LedgerTransaction`].
///
/// # Errors
///
/// Returns [`LedgerError::Rpc`] if the transaction did not come back in
/// parsed-JSON form, which means it was fetched with the wrong encoding.
pub fn decode_transaction(
    signature: &str,
    encoded: EncodedConfirmedTransactionWithStatusMeta,
) -> Result<LedgerTransaction, LedgerError> {
    let meta = encoded.transaction.meta;
    let EncodedTransaction::Json(transaction) = encoded.transaction.transaction else {
        return Err(LedgerError::Rpc(format!(
            "transaction {signature} was not returned as parsed json"
        )));
    };
    let UiMessage::Parsed(message) = transaction.message else {
        return Err(LedgerError::Rpc(format!(
            "message of transaction {signature} was not parsed"
        )));
    };

    let succeeded = meta.as_ref().is_some_and(|meta| meta.err.is_none());
    let (pre_balances, post_balances) = meta
        .map(|meta| (meta.pre_balances, meta.post_balances))
        .unwrap_or_default();

    Ok(LedgerTransaction {
        signature: transaction
            .signatures
            .into_iter()
            .next()
            .unwrap_or_else(|| signature.to_owned()),
        slot: encoded.slot,
        block_hash: message.recent_blockhash,
        block_time: encoded
            .block_time
            .and_then(|secs| u64::try_from(secs).ok())
            .map(UnixTimestamp::from_secs),
        succeeded,
        transfers: collect_transfers(&message.instructions),
        account_keys: message
            .account_keys
            .into_iter()
            .map(|account| account.pubkey)
            .collect(),
        pre_balances,
        post_balances,
    })
}

fn collect_transfers(instructions: &[UiInstruction]) -> Vec<TransferInstruction> {
    instructions
        .iter()
        .filter_map(|instruction| {
            let UiInstruction::Parsed(UiParsedInstruction::Parsed(parsed)) = instruction else {
                return None;
            };
            transfer_from_parsed(&parsed.program, &parsed.parsed)
        })
        .collect()
}

fn transfer_from_parsed(program: &str, parsed: &Value) -> Option<TransferInstruction> {
    let kind = parsed.get("type")?.as_str()?;
    let info = parsed.get("info")?;
    let destination = info.get("destination")?.as_str()?.to_owned();
    match (program, kind) {
        ("spl-token", "transferChecked") => Some(TransferInstruction {
            destination,
            amount: info
                .get("tokenAmount")?
                .get("uiAmountString")?
                .as_str()?
                .parse()
                .ok()?,
            mint: info.get("mint").and_then(Value::as_str).map(str::to_owned),
        }),
        ("spl-token", "transfer") => Some(TransferInstruction {
            destination,
            amount: Amount::from_lamports(info.get("amount")?.as_str()?.parse().ok()?),
            mint: None,
        }),
        ("system", "transfer") => Some(TransferInstruction {
            destination,
            amount: Amount::from_lamports(info.get("lamports")?.as_u64()?),
            mint: None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAYER: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
    const POOL: &str = "7v91N7iZ9mNicL8WfG6cgSCKyRXydQjLh6UYBWwm6y1Q";
    const PAYER_ATA: &str = "DRpbCBMxVnDK7maPM5tGv6MvB3v1sRMC86PZ8okm21hy";
    const MERCHANT_ATA: &str = "HN7cABqLq46Es1jh92dQQisAq662SmxELLLsHHe4YWrH";
    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
    const SIG: &str = "5j7s6NiJS3JAkvgkoc18WVAsiSaci2pxB2A6ueCJP4tprA2TFg9wSyTLeYouxPBJEMzJinENTkpA52YStRW5Dia7";

    fn fixture(message: Value, meta: Value) -> EncodedConfirmedTransactionWithStatusMeta {
        serde_json::from_value(json!({
            "slot": 363_443_130_u64,
            "blockTime": 1_755_900_000_i64,
            "transaction": {
                "signatures": [SIG],
                "message": message,
            },
            "meta": meta,
            "version": 0,
        }))
        .expect("fixture should deserialize")
    }

    fn ok_meta(pre: Vec<u64>, post: Vec<u64>) -> Value {
        json!({
            "err": null,
            "status": { "Ok": null },
            "fee": 5000,
            "preBalances": pre,
            "postBalances": post,
            "innerInstructions": [],
            "logMessages": [],
            "preTokenBalances": [],
            "postTokenBalances": [],
            "rewards": [],
        })
    }

    fn message(instructions: Value, keys: &[&str]) -> Value {
        let account_keys: Vec<Value> = keys
            .iter()
            .map(|key| {
                json!({
                    "pubkey": key,
                    "signer": false,
                    "writable": true,
                    "source": "transaction",
                })
            })
            .collect();
        json!({
            "accountKeys": account_keys,
            "recentBlockhash": "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N",
            "instructions": instructions,
            "addressTableLookups": null,
        })
    }

    #[test]
    fn test_decodes_spl_transfer_checked() {
        let msg = message(
            json!([{
                "program": "spl-token",
                "programId": TOKEN_PROGRAM,
                "parsed": {
                    "type": "transferChecked",
                    "info": {
                        "source": PAYER_ATA,
                        "destination": MERCHANT_ATA,
                        "mint": USDC,
                        "authority": PAYER,
                        "tokenAmount": {
                            "amount": "1500000",
                            "decimals": 6,
                            "uiAmount": 1.5,
                            "uiAmountString": "1.5",
                        },
                    },
                },
                "stackHeight": null,
            }]),
            &[PAYER, PAYER_ATA, MERCHANT_ATA, TOKEN_PROGRAM],
        );
        let meta = ok_meta(
            vec![1_000_000_000, 2_039_280, 2_039_280, 1],
            vec![999_995_000, 2_039_280, 2_039_280, 1],
        );

        let tx = decode_transaction(SIG, fixture(msg, meta)).unwrap();

        assert_eq!(tx.signature, SIG);
        assert_eq!(tx.slot, 363_443_130);
        assert!(tx.succeeded);
        assert_eq!(tx.block_time, Some(UnixTimestamp::from_secs(1_755_900_000)));
        assert_eq!(tx.block_hash, "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N");
        assert_eq!(tx.account_keys[0], PAYER);
        assert_eq!(tx.transfers.len(), 1);
        assert_eq!(tx.transfers[0].destination, MERCHANT_ATA);
        assert_eq!(tx.transfers[0].amount, "1.5".parse().unwrap());
        assert_eq!(tx.transfers[0].mint.as_deref(), Some(USDC));
    }

    #[test]
    fn test_decodes_system_and_raw_token_transfers() {
        let msg = message(
            json!([
                {
                    "program": "system",
                    "programId": "11111111111111111111111111111111",
                    "parsed": {
                        "type": "transfer",
                        "info": {
                            "source": PAYER,
                            "destination": POOL,
                            "lamports": 500_000_000_u64,
                        },
                    },
                    "stackHeight": null,
                },
                {
                    "program": "spl-token",
                    "programId": TOKEN_PROGRAM,
                    "parsed": {
                        "type": "transfer",
                        "info": {
                            "source": PAYER_ATA,
                            "destination": MERCHANT_ATA,
                            "authority": PAYER,
                            "amount": "250000000",
                        },
                    },
                    "stackHeight": null,
                },
            ]),
            &[PAYER, POOL],
        );
        let meta = ok_meta(vec![2_000_000_000, 0], vec![1_499_995_000, 500_000_000]);

        let tx = decode_transaction(SIG, fixture(msg, meta)).unwrap();

        assert_eq!(tx.transfers.len(), 2);
        assert_eq!(tx.transfers[0].destination, POOL);
        assert_eq!(tx.transfers[0].amount, "0.5".parse().unwrap());
        assert_eq!(tx.transfers[0].mint, None);
        assert_eq!(tx.transfers[1].destination, MERCHANT_ATA);
        assert_eq!(tx.transfers[1].amount, "0.25".parse().unwrap());
        assert_eq!(tx.balance_delta(POOL).unwrap(), "0.5".parse().unwrap());
    }

    #[test]
    fn test_failed_transaction_is_not_succeeded() {
        let msg = message(
            json!([{
                "program": "system",
                "programId": "11111111111111111111111111111111",
                "parsed": {
                    "type": "transfer",
                    "info": { "source": PAYER, "destination": POOL, "lamports": 1_000_u64 },
                },
                "stackHeight": null,
            }]),
            &[PAYER, POOL],
        );
        let meta = json!({
            "err": { "InstructionError": [0, { "Custom": 1 }] },
            "status": { "Err": { "InstructionError": [0, { "Custom": 1 }] } },
            "fee": 5000,
            "preBalances": [1_000_000_000_u64, 0_u64],
            "postBalances": [999_995_000_u64, 0_u64],
            "innerInstructions": [],
            "logMessages": [],
            "preTokenBalances": [],
            "postTokenBalances": [],
            "rewards": [],
        });

        let tx = decode_transaction(SIG, fixture(msg, meta)).unwrap();

        assert!(!tx.succeeded);
        // The walk still happens; rejection is the verifier's call.
        assert_eq!(tx.transfers.len(), 1);
    }

    #[test]
    fn test_missing_meta_is_not_succeeded() {
        let tx = decode_transaction(SIG, fixture(message(json!([]), &[PAYER]), Value::Null))
            .unwrap();

        assert!(!tx.succeeded);
        assert!(tx.pre_balances.is_empty());
        assert!(tx.post_balances.is_empty());
    }

    #[test]
    fn test_skips_unrecognized_instructions() {
        let msg = message(
            json!([
                {
                    "program": "spl-memo",
                    "programId": "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr",
                    "parsed": "paid",
                    "stackHeight": null,
                },
                {
                    "programId": "ComputeBudget111111111111111111111111111111",
                    "accounts": [],
                    "data": "3gJqkocMWaMm",
                    "stackHeight": null,
                },
            ]),
            &[PAYER],
        );

        let tx = decode_transaction(SIG, fixture(msg, ok_meta(vec![1], vec![1]))).unwrap();

        assert!(tx.transfers.is_empty());
    }

    #[test]
    fn test_rejects_binary_transaction() {
        let encoded: EncodedConfirmedTransactionWithStatusMeta = serde_json::from_value(json!({
            "slot": 1_u64,
            "blockTime": null,
            "transaction": ["AQABAgME", "base64"],
            "meta": null,
            "version": 0,
        }))
        .expect("fixture should deserialize");

        let result = decode_transaction(SIG, encoded);

        assert!(matches!(result, Err(LedgerError::Rpc(_))));
    }
}
