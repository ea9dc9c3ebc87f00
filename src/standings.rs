use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::SchemaError;
use crate::identity::{IdentityResolver, SnapshotId};
use crate::table::{Cell, Table};

pub const CLUB_COLUMN: &str = "Squad";
pub const CONTEXT_COLUMNS: [&str; 3] = ["League_Position", "Points_%", "Goal_Diff_%"];

fn ratio(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    match (num, den) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d),
        _ => None,
    }
}

/// Club context from an overall standings table (Rk, Squad, MP, GF, GA, GD,
/// Pts): league position, share of available points and goal-difference
/// share of all goals in the club's matches.
pub fn club_context(standings: &Table, league: &str) -> Result<Table, SchemaError> {
    for col in ["Rk", CLUB_COLUMN, "MP", "GF", "GA", "GD", "Pts"] {
        standings.require_column(col)?;
    }
    let mut columns = vec![CLUB_COLUMN, "League"];
    columns.extend(CONTEXT_COLUMNS);
    let mut out = Table::with_columns("club_context", &columns);
    for r in 0..standings.len() {
        let squad = standings.cell(r, CLUB_COLUMN);
        if squad.is_null() {
            continue;
        }
        let num = |c: &str| standings.cell(r, c).as_f64();
        let goals = match (num("GF"), num("GA")) {
            (Some(f), Some(a)) => Some(f + a),
            _ => None,
        };
        out.push_row(vec![
            squad.clone(),
            Cell::text(league),
            Cell::from_opt(num("Rk")),
            Cell::from_opt(ratio(num("Pts"), num("MP").map(|mp| 3.0 * mp))),
            Cell::from_opt(ratio(num("GD"), goals)),
        ]);
    }
    Ok(out)
}

/// Joins club context into player rows by fuzzy club-name matching. The
/// players' own club column is left as is. Returns how many rows matched.
pub fn attach_club_context(
    players: &mut Table,
    clubs: &Table,
    resolver: &mut IdentityResolver,
) -> Result<usize, SchemaError> {
    let club_idx = players.require_column(CLUB_COLUMN)?;
    let ref_idx = clubs.require_column(CLUB_COLUMN)?;

    let mut by_name: HashMap<String, usize> = HashMap::new();
    let mut choices: Vec<String> = Vec::new();
    for (i, row) in clubs.rows().iter().enumerate() {
        if row[ref_idx].is_null() {
            continue;
        }
        let key = row[ref_idx].key_repr();
        if !by_name.contains_key(&key) {
            by_name.insert(key.clone(), i);
            choices.push(key);
        }
    }
    let snapshot = SnapshotId::of(&choices);

    let mut resolved: HashMap<String, Option<usize>> = HashMap::new();
    for value in players.distinct_values(CLUB_COLUMN) {
        let hit = resolver
            .lookup(&value, &choices, &snapshot)
            .and_then(|(canonical, _)| by_name.get(&canonical).copied());
        if hit.is_none() {
            warn!(club = %value, "no standings match for club");
        }
        resolved.insert(value, hit);
    }

    let club_rows: Vec<Option<usize>> = players
        .rows()
        .iter()
        .map(|row| {
            let cell = &row[club_idx];
            if cell.is_null() {
                None
            } else {
                resolved.get(&cell.key_repr()).copied().flatten()
            }
        })
        .collect();
    for col in CONTEXT_COLUMNS {
        let values = club_rows
            .iter()
            .map(|r| r.map(|i| clubs.cell(i, col).clone()).unwrap_or_default())
            .collect();
        players.set_column(col, values);
    }
    let matched = club_rows.iter().filter(|r| r.is_some()).count();
    info!(table = %players.name, matched, rows = players.len(), "club context attached");
    Ok(matched)
}
