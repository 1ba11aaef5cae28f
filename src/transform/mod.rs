// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Turns extracted actor state changes into relational rows, written as
//! one JSON object per line.
//!
//! Every row carries the table it belongs to, the height of the tipset whose
//! parent state holds the change and that state root. Values the chain
//! stores as CBOR are kept as hex strings of their encoding.

use std::io::Write;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::extract::ActorStateChanges;
use crate::container::Extraction;
use crate::shim::address::Address;
use crate::shim::clock::ChainEpoch;
use crate::utils::encoding::DeferredCbor;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Table {
    ActorStates,
    InitAddresses,
    MarketDealStates,
    MarketDealProposals,
    MinerInfos,
    MinerSectors,
    MinerPreCommits,
    MinerSectorEvents,
    PowerClaims,
    VerifregVerifiers,
    VerifregClients,
    VerifregClaims,
    VerifregAllocations,
    DatacapBalances,
    DatacapAllowances,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub table: Table,
    pub height: ChainEpoch,
    pub state_root: String,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

fn hex_of(value: Option<&DeferredCbor>) -> Value {
    value.map_or(Value::Null, |v| Value::String(hex::encode(v.bytes())))
}

struct Rows<'a> {
    changes: &'a ActorStateChanges,
    rows: Vec<Row>,
}

impl Rows<'_> {
    fn push(&mut self, table: Table, values: Value) {
        let Value::Object(values) = values else {
            return;
        };
        self.rows.push(Row {
            table,
            height: self.changes.current.epoch(),
            state_root: self.changes.current.parent_state().to_string(),
            values,
        });
    }
}

/// Addresses of a per-actor map in address byte order.
fn sorted<V>(map: &ahash::HashMap<Address, V>) -> Vec<(&Address, &V)> {
    let mut entries = map.iter().collect::<Vec<_>>();
    entries.sort_by_cached_key(|(address, _)| address.to_bytes());
    entries
}

/// Rows of one tipset pair, in a stable order.
pub fn rows(changes: &ActorStateChanges) -> Vec<Row> {
    let mut out = Rows {
        changes,
        rows: vec![],
    };

    for (address, raw) in sorted(&changes.raw) {
        let actor = raw.current.as_ref().or(raw.executed.as_ref());
        out.push(
            Table::ActorStates,
            json!({
                "address": address.to_string(),
                "change": raw.change.to_string(),
                "code": actor.map(|a| a.code.to_string()),
                "head": actor.map(|a| a.state.to_string()),
                "nonce": actor.map(|a| a.sequence),
                "balance": actor.map(|a| a.balance.atto().to_string()),
                "state": hex_of(raw.head.as_ref()),
            }),
        );
    }

    if let Some(init) = &changes.init {
        for change in &init.addresses {
            out.push(
                Table::InitAddresses,
                json!({
                    "address": change.address.to_string(),
                    "change": change.change.to_string(),
                    "id": change.current_id().ok().flatten(),
                }),
            );
        }
    }

    if let Some(market) = &changes.market {
        for deal in &market.deals {
            out.push(
                Table::MarketDealStates,
                json!({
                    "deal_id": deal.deal_id,
                    "change": deal.change.to_string(),
                    "current": hex_of(deal.current.as_ref()),
                    "previous": hex_of(deal.previous.as_ref()),
                }),
            );
        }
        for proposal in &market.proposals {
            out.push(
                Table::MarketDealProposals,
                json!({
                    "deal_id": proposal.deal_id,
                    "change": proposal.change.to_string(),
                    "current": hex_of(proposal.current.as_ref()),
                    "previous": hex_of(proposal.previous.as_ref()),
                }),
            );
        }
    }

    for (miner, diff) in sorted(&changes.miners) {
        let miner = miner.to_string();
        if let Some(info) = &diff.info {
            out.push(
                Table::MinerInfos,
                json!({
                    "miner": miner,
                    "change": info.change.to_string(),
                    "info": hex_of(Some(&info.info)),
                }),
            );
        }
        for sector in &diff.sectors {
            out.push(
                Table::MinerSectors,
                json!({
                    "miner": miner,
                    "sector": sector.sector,
                    "change": sector.change.to_string(),
                    "current": hex_of(sector.current.as_ref()),
                    "previous": hex_of(sector.previous.as_ref()),
                }),
            );
        }
        for pre_commit in &diff.pre_commits {
            out.push(
                Table::MinerPreCommits,
                json!({
                    "miner": miner,
                    "sector": pre_commit.sector,
                    "change": pre_commit.change.to_string(),
                    "current": hex_of(pre_commit.current.as_ref()),
                    "previous": hex_of(pre_commit.previous.as_ref()),
                }),
            );
        }
        if let Some(status) = &diff.sector_status {
            let events = [
                ("faulted", &status.faulted),
                ("recovering", &status.recovering),
                ("recovered", &status.recovered),
                ("removed", &status.removed),
            ];
            for (event, sectors) in events {
                for sector in sectors.iter() {
                    out.push(
                        Table::MinerSectorEvents,
                        json!({ "miner": miner, "sector": sector, "event": event }),
                    );
                }
            }
        }
    }

    if let Some(power) = &changes.power {
        for claim in &power.claims {
            out.push(
                Table::PowerClaims,
                json!({
                    "miner": claim.miner.to_string(),
                    "change": claim.change.to_string(),
                    "current": hex_of(claim.current.as_ref()),
                    "previous": hex_of(claim.previous.as_ref()),
                }),
            );
        }
    }

    if let Some(verifreg) = &changes.verifreg {
        for verifier in &verifreg.verifiers {
            out.push(
                Table::VerifregVerifiers,
                json!({
                    "verifier": verifier.verifier.to_string(),
                    "change": verifier.change.to_string(),
                    "current": hex_of(verifier.current.as_ref()),
                    "previous": hex_of(verifier.previous.as_ref()),
                }),
            );
        }
        for client in &verifreg.clients {
            out.push(
                Table::VerifregClients,
                json!({
                    "client": client.client.to_string(),
                    "change": client.change.to_string(),
                    "current": hex_of(client.current.as_ref()),
                    "previous": hex_of(client.previous.as_ref()),
                }),
            );
        }
        for claim in &verifreg.claims {
            out.push(
                Table::VerifregClaims,
                json!({
                    "provider": Address::new_id(claim.provider).to_string(),
                    "claim_id": claim.claim_id,
                    "change": claim.change.to_string(),
                    "current": hex_of(claim.current.as_ref()),
                    "previous": hex_of(claim.previous.as_ref()),
                }),
            );
        }
        for allocation in &verifreg.allocations {
            out.push(
                Table::VerifregAllocations,
                json!({
                    "client": Address::new_id(allocation.client).to_string(),
                    "allocation_id": allocation.allocation_id,
                    "change": allocation.change.to_string(),
                    "current": hex_of(allocation.current.as_ref()),
                    "previous": hex_of(allocation.previous.as_ref()),
                }),
            );
        }
    }

    if let Some(datacap) = &changes.datacap {
        for balance in &datacap.balances {
            out.push(
                Table::DatacapBalances,
                json!({
                    "client": Address::new_id(balance.client).to_string(),
                    "change": balance.change.to_string(),
                    "current": hex_of(balance.current.as_ref()),
                    "previous": hex_of(balance.previous.as_ref()),
                }),
            );
        }
        for allowance in &datacap.allowances {
            out.push(
                Table::DatacapAllowances,
                json!({
                    "owner": Address::new_id(allowance.owner).to_string(),
                    "operator": Address::new_id(allowance.operator).to_string(),
                    "change": allowance.change.to_string(),
                    "current": hex_of(allowance.current.as_ref()),
                    "previous": hex_of(allowance.previous.as_ref()),
                }),
            );
        }
    }

    out.rows
}

/// Writes the rows of every pair of `extraction` as JSON lines and returns
/// how many were written.
pub fn write_rows(extraction: &Extraction, mut writer: impl Write) -> anyhow::Result<usize> {
    let mut written = 0;
    for changes in &extraction.changes {
        for row in rows(changes) {
            serde_json::to_writer(&mut writer, &row)?;
            writer.write_all(b"\n")?;
            written += 1;
        }
    }
    writer.flush()?;
    Ok(written)
}
