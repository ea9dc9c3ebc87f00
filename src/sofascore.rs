use chrono::{DateTime, Datelike, NaiveDate};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::FetchError;
use crate::source::Source;
use crate::table::{Cell, Table};

pub const API_BASE: &str = "https://api.sofascore.com/api/v1";
pub const STATS_PREFIX: &str = "stats.";
pub const SOURCE_NAME: &str = "sofascore";

pub fn seasons_url(tournament_id: u32) -> String {
    format!("{API_BASE}/unique-tournament/{tournament_id}/seasons")
}

pub fn teams_url(tournament_id: u32, season_id: u64) -> String {
    format!("{API_BASE}/unique-tournament/{tournament_id}/season/{season_id}/teams")
}

pub fn squad_url(team_id: u64) -> String {
    format!("{API_BASE}/team/{team_id}/players")
}

pub fn player_stats_url(player_id: u64, tournament_id: u32, season_id: u64) -> String {
    format!("{API_BASE}/player/{player_id}/unique-tournament/{tournament_id}/season/{season_id}/statistics/overall")
}

fn birth_year(player: &Value) -> Option<i32> {
    if let Some(ts) = player.get("dateOfBirthTimestamp").and_then(Value::as_i64) {
        return DateTime::from_timestamp(ts, 0).map(|d| d.year());
    }
    let raw = player.get("dateOfBirth")?.as_str()?;
    NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

/// Numeric statistics of a `statistics/overall` payload, either top-level
/// or nested under `data`.
pub fn numeric_stats(payload: &Value) -> Vec<(String, f64)> {
    let stats = payload
        .get("statistics")
        .or_else(|| payload.get("data").and_then(|d| d.get("statistics")));
    let Some(map) = stats.and_then(Value::as_object) else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
        .collect()
}

/// Live per-player statistics for every squad of one tournament's current
/// season. Players without a birth date, and players whose statistics are
/// missing or not served, are skipped.
pub fn scrape_league(source: &mut dyn Source, league: &str, tournament_id: u32) -> Result<Table, FetchError> {
    info!(league, tournament_id, "scraping sofascore league");
    let seasons = source.fetch_json(&seasons_url(tournament_id))?;
    let Some(season_id) = seasons
        .get("seasons")
        .and_then(|s| s.get(0))
        .and_then(|s| s.get("id"))
        .and_then(Value::as_u64)
    else {
        return Ok(Table::new(SOURCE_NAME, Vec::new()));
    };
    let teams = source.fetch_json(&teams_url(tournament_id, season_id))?;
    let teams = teams.get("teams").and_then(Value::as_array).cloned().unwrap_or_default();

    let mut rows: Vec<Vec<(String, Cell)>> = Vec::new();
    for team in &teams {
        let (Some(team_id), Some(team_name)) = (
            team.get("id").and_then(Value::as_u64),
            team.get("name").and_then(Value::as_str),
        ) else {
            continue;
        };
        debug!(team = team_name, "sofascore squad");
        let squad = source.fetch_json(&squad_url(team_id))?;
        let players = squad.get("players").and_then(Value::as_array).cloned().unwrap_or_default();
        for entry in &players {
            let Some(player) = entry.get("player") else {
                continue;
            };
            let Some(born) = birth_year(player) else {
                continue;
            };
            let (Some(player_id), Some(name)) = (
                player.get("id").and_then(Value::as_u64),
                player.get("name").and_then(Value::as_str),
            ) else {
                continue;
            };
            let payload = match source.fetch_json(&player_stats_url(player_id, tournament_id, season_id)) {
                Ok(p) => p,
                Err(FetchError::Http { status, .. }) => {
                    debug!(player = name, status, "no sofascore statistics");
                    continue;
                }
                Err(err) => return Err(err),
            };
            let stats = numeric_stats(&payload);
            if stats.is_empty() {
                continue;
            }
            let nation = player
                .get("country")
                .and_then(|c| c.get("alpha3"))
                .and_then(Value::as_str);
            let mut row = vec![
                ("League".to_string(), Cell::text(league)),
                ("Club".to_string(), Cell::text(team_name)),
                ("Club_ID".to_string(), Cell::Num(team_id as f64)),
                ("Player".to_string(), Cell::text(name)),
                ("Player_ID".to_string(), Cell::Num(player_id as f64)),
                ("Nation".to_string(), nation.map(Cell::text).unwrap_or_default()),
                ("Born".to_string(), Cell::Num(f64::from(born))),
            ];
            let minutes = stats.iter().find(|(k, _)| k == "minutesPlayed").map(|(_, v)| *v);
            row.extend(stats.into_iter().map(|(k, v)| (format!("{STATS_PREFIX}{k}"), Cell::Num(v))));
            row.push((
                format!("{STATS_PREFIX}full_games"),
                Cell::from_opt(minutes.map(|m| m / 90.0)),
            ));
            rows.push(row);
        }
    }
    let table = table_from_records(SOURCE_NAME, rows);
    info!(league, players = table.len(), "sofascore league done");
    Ok(table)
}

/// Builds a table from per-row (column, value) lists; columns are the union
/// in first-seen order.
pub fn table_from_records(name: &str, records: Vec<Vec<(String, Cell)>>) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for (k, _) in record {
            if !columns.contains(k) {
                columns.push(k.clone());
            }
        }
    }
    let mut table = Table::new(name, columns);
    for record in records {
        let mut row = vec![Cell::Null; table.columns().len()];
        for (k, v) in record {
            if let Some(idx) = table.column_index(&k) {
                row[idx] = v;
            }
        }
        table.push_row(row);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stats_from_either_shape() {
        let top = json!({"statistics": {"goals": 3, "rating": 7.1, "type": "overall"}});
        let nested = json!({"data": {"statistics": {"goals": 3}}});
        assert_eq!(numeric_stats(&top).len(), 2);
        assert_eq!(numeric_stats(&nested), vec![("goals".to_string(), 3.0)]);
        assert!(numeric_stats(&json!({})).is_empty());
    }

    #[test]
    fn birth_year_from_timestamp_or_text() {
        assert_eq!(birth_year(&json!({"dateOfBirthTimestamp": 946684800})), Some(2000));
        assert_eq!(birth_year(&json!({"dateOfBirth": "1999-05-01T00:00:00"})), Some(1999));
        assert_eq!(birth_year(&json!({"name": "x"})), None);
    }
}
