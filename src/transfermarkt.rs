use scraper::{ElementRef, Html, Selector};

use crate::market_value::parse_market_value;
use crate::schema::{position_code, position_group};
use crate::table::{Cell, Table};

pub const TM_BASE: &str = "https://www.transfermarkt.com";

pub const MARKET_COLUMNS: [&str; 9] = [
    "Player",
    "TM_Player_ID",
    "Club",
    "Position",
    "Age",
    "Nation",
    "Market_Value_Text",
    "Market_Value_EUR",
    "TM_URL",
];

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

/// Market-value list of one competition, e.g. `premier-league` / `GB1`.
pub fn market_value_url(slug: &str, competition_code: &str, page: u32) -> String {
    format!("{TM_BASE}/{slug}/marktwerte/wettbewerb/{competition_code}?page={page}")
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn player_id(href: &str) -> Option<String> {
    let rest = &href[href.find("/spieler/")? + "/spieler/".len()..];
    let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!id.is_empty()).then_some(id)
}

/// Parses one page of a market-value list. A page without the `items`
/// table (end of pagination, or a block page) yields an empty table.
pub fn parse_market_value_page(html: &str) -> Table {
    let document = Html::parse_document(html);
    let rows_sel = sel("table.items > tbody > tr.odd, table.items > tbody > tr.even");
    let player_sel = sel("td.hauptlink a");
    let club_sel = sel("td.zentriert a[title]");
    let value_sel = sel("td.rechts.hauptlink");
    let position_sel = sel("table.inline-table tr");
    let flag_sel = sel("td.zentriert img.flaggenrahmen[title]");
    let centered_sel = sel("td.zentriert");
    let link_or_img = sel("a, img");

    let mut out = Table::with_columns("transfermarkt", &MARKET_COLUMNS);
    for tr in document.select(&rows_sel) {
        let Some(a_player) = tr.select(&player_sel).next() else {
            continue;
        };
        let name = text_of(a_player);
        if name.is_empty() {
            continue;
        }
        let href = a_player.value().attr("href");
        let club = tr
            .select(&club_sel)
            .next()
            .and_then(|a| a.value().attr("title"))
            .map(str::to_string);
        let value_text = tr.select(&value_sel).next().map(text_of);
        let position = tr.select(&position_sel).last().map(text_of).filter(|p| !p.is_empty());
        let nation = tr
            .select(&flag_sel)
            .next()
            .and_then(|img| img.value().attr("title"))
            .map(str::to_string);
        // Plain centred cells are rank then age.
        let age = tr
            .select(&centered_sel)
            .filter(|td| td.select(&link_or_img).next().is_none())
            .map(text_of)
            .filter_map(|t| t.parse::<f64>().ok())
            .nth(1);

        out.push_row(vec![
            Cell::Text(name),
            href.and_then(player_id).map(Cell::Text).unwrap_or_default(),
            club.map(Cell::Text).unwrap_or_default(),
            position.map(Cell::Text).unwrap_or_default(),
            Cell::from_opt(age),
            nation.map(Cell::Text).unwrap_or_default(),
            value_text.clone().map(Cell::Text).unwrap_or_default(),
            Cell::from_opt(value_text.as_deref().and_then(parse_market_value).map(|v| v as f64)),
            href.map(|h| Cell::Text(format!("{TM_BASE}{h}"))).unwrap_or_default(),
        ]);
    }
    out
}

/// Adds `Pos` (short code) and `Pos_group` derived from `Position`.
pub fn add_position_codes(table: &mut Table) {
    let Some(positions) = table.cells("Position") else {
        return;
    };
    let codes: Vec<Option<&'static str>> = positions
        .iter()
        .map(|c| c.as_text().and_then(position_code))
        .collect();
    table.set_column(
        "Pos",
        codes.iter().map(|c| c.map(Cell::from).unwrap_or_default()).collect(),
    );
    table.set_column(
        "Pos_group",
        codes
            .iter()
            .map(|c| c.and_then(position_group).map(Cell::from).unwrap_or_default())
            .collect(),
    );
}
