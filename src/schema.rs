use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Identity and grouping columns that are never treated as features.
pub const NON_FEATURES: [&str; 15] = [
    "Player",
    "Player_raw",
    "Born",
    "Nation",
    "Date",
    "Table",
    "Matches",
    "Squad",
    "Pos",
    "Position",
    "Age",
    "Pos_group",
    "League",
    "Market_Value_EUR",
    "Club",
];

/// Transfermarkt position label to short code.
pub const POSITION_MAP: [(&str, &str); 18] = [
    ("Goalkeeper", "GK"),
    ("Centre-Back", "CB"),
    ("Left-Back", "LB"),
    ("Right-Back", "RB"),
    ("Defender", "DF"),
    ("Left Wing-Back", "LWB"),
    ("Right Wing-Back", "RWB"),
    ("Defensive Midfield", "DM"),
    ("Central Midfield", "CM"),
    ("Midfield", "MF"),
    ("Attacking Midfield", "AM"),
    ("Left Midfield", "LM"),
    ("Right Midfield", "RM"),
    ("Left Winger", "LW"),
    ("Right Winger", "RW"),
    ("Centre-Forward", "ST"),
    ("Second Striker", "SS"),
    ("Forward", "FW"),
];

/// Short code to coarse position group. Generic codes (DF, MF, FW) have no group.
pub const POSITION_GROUPS: [(&str, &str); 15] = [
    ("GK", "GK"),
    ("LB", "FB"),
    ("RB", "FB"),
    ("LWB", "FB"),
    ("RWB", "FB"),
    ("CB", "CB"),
    ("DM", "DM"),
    ("CM", "CM"),
    ("RW", "AM"),
    ("LW", "AM"),
    ("AM", "AM"),
    ("LM", "AM"),
    ("RM", "AM"),
    ("ST", "ST"),
    ("SS", "ST"),
];

pub fn position_code(label: &str) -> Option<&'static str> {
    let label = label.trim();
    POSITION_MAP
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(label))
        .map(|(_, code)| *code)
        .or_else(|| {
            POSITION_GROUPS
                .iter()
                .find(|(code, _)| code.eq_ignore_ascii_case(label))
                .map(|(code, _)| *code)
        })
}

pub fn position_group(code: &str) -> Option<&'static str> {
    POSITION_GROUPS
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code.trim()))
        .map(|(_, group)| *group)
}

/// Position group for a full Transfermarkt label or a short code.
pub fn position_group_for_label(label: &str) -> Option<&'static str> {
    position_code(label).and_then(position_group)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBundle {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSchema {
    pub group: String,
    pub bundles: Vec<FeatureBundle>,
}

impl PositionSchema {
    /// Every column named by any bundle, first occurrence order.
    pub fn feature_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for bundle in &self.bundles {
            for col in &bundle.columns {
                if !out.contains(col) {
                    out.push(col.clone());
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub groups: Vec<PositionSchema>,
}

impl FeatureSchema {
    pub fn group(&self, name: &str) -> Option<&PositionSchema> {
        self.groups.iter().find(|g| g.group == name)
    }

    pub fn all_feature_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for group in &self.groups {
            for col in group.feature_columns() {
                if !out.contains(&col) {
                    out.push(col);
                }
            }
        }
        out
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        DEFAULT_SCHEMA.clone()
    }
}

fn bundle(name: &str, columns: &[&str]) -> FeatureBundle {
    FeatureBundle {
        name: name.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
    }
}

fn group(name: &str, bundles: Vec<FeatureBundle>) -> PositionSchema {
    PositionSchema {
        group: name.to_string(),
        bundles,
    }
}

pub static DEFAULT_SCHEMA: Lazy<FeatureSchema> = Lazy::new(|| FeatureSchema {
    groups: vec![
        group(
            "GK",
            vec![
                bundle(
                    "shot_stopping",
                    &[
                        "stats_keeper__Performance.GA90",
                        "stats_keeper__Performance.Save%",
                        "stats_keeper_adv__Expected.PSxG/SoT",
                        "stats_keeper_adv__Expected./90",
                    ],
                ),
                bundle(
                    "command_of_area",
                    &[
                        "stats_keeper_adv__Crosses.Stp%",
                        "stats_keeper_adv__Sweeper.#OPA/90",
                        "stats_keeper_adv__Sweeper.AvgDist",
                    ],
                ),
                bundle(
                    "distribution",
                    &[
                        "stats_keeper_adv__Passes.Att_(GK)",
                        "stats_keeper_adv__Passes.Launch%",
                        "stats_keeper_adv__Passes.AvgLen",
                        "stats_keeper_adv__Goal_Kicks.Launch%",
                    ],
                ),
                bundle("penalties", &["stats_keeper__Penalty_Kicks.Save%"]),
            ],
        ),
        group(
            "CB",
            vec![
                bundle(
                    "defending_volume",
                    &[
                        "stats_defense__Tackles.Tkl",
                        "stats_defense__Int",
                        "stats_defense__Clr",
                        "stats_defense__Blocks.Blocks",
                    ],
                ),
                bundle("defending_quality", &["stats_defense__Challenges.Tkl%", "stats_defense__Err"]),
                bundle("aerials", &["stats_misc__Aerial_Duels.Won", "stats_misc__Aerial_Duels.Won%"]),
                bundle(
                    "ball_progression",
                    &[
                        "stats_passing__Total.Cmp%",
                        "stats_passing__Total.PrgDist",
                        "stats_passing__PrgP",
                        "stats_possession__Carries.PrgC",
                    ],
                ),
                bundle("discipline", &["stats_misc__Performance.CrdY", "stats_misc__Performance.CrdR"]),
            ],
        ),
        group(
            "FB",
            vec![
                bundle(
                    "defending",
                    &["stats_defense__Tackles.Tkl", "stats_defense__Int", "stats_defense__Challenges.Tkl%"],
                ),
                bundle(
                    "progression",
                    &[
                        "stats_possession__Carries.PrgC",
                        "stats_possession__Carries.PrgDist",
                        "stats_passing__PrgP",
                    ],
                ),
                bundle("crossing", &["stats_passing__CrsPA", "stats_passing_types__Pass_Types.Crs"]),
                bundle("chance_creation", &["stats_passing__KP", "stats_passing__xAG"]),
                bundle(
                    "attacking_presence",
                    &["stats_possession__Touches.Att_3rd", "stats_possession__Touches.Att_Pen"],
                ),
            ],
        ),
        group(
            "DM",
            vec![
                bundle(
                    "defensive_actions",
                    &["stats_defense__Tackles.Tkl", "stats_defense__Int", "stats_defense__Tkl_Int"],
                ),
                bundle("pressing_zones", &["stats_defense__Tackles.Def_3rd", "stats_defense__Tackles.Mid_3rd"]),
                bundle(
                    "passing_security",
                    &[
                        "stats_passing__Total.Cmp%",
                        "stats_passing__Short.Cmp%",
                        "stats_passing__Medium.Cmp%",
                    ],
                ),
                bundle("progression", &["stats_passing__PrgP", "stats_possession__Carries.PrgC"]),
                bundle("discipline", &["stats_misc__Performance.Fls", "stats_misc__Performance.CrdY"]),
            ],
        ),
        group(
            "CM",
            vec![
                bundle(
                    "ball_progression",
                    &[
                        "stats_passing__PrgP",
                        "stats_possession__Carries.PrgC",
                        "stats_possession__Carries.PrgDist",
                    ],
                ),
                bundle(
                    "passing_range",
                    &[
                        "stats_passing__Total.Cmp%",
                        "stats_passing__Medium.Cmp%",
                        "stats_passing__Long.Cmp%",
                    ],
                ),
                bundle("chance_creation", &["stats_passing__KP", "stats_passing__xAG"]),
                bundle("defensive_support", &["stats_defense__Tackles.Tkl", "stats_defense__Int"]),
                bundle(
                    "box_activity",
                    &["stats_possession__Touches.Att_3rd", "stats_possession__Touches.Def_3rd"],
                ),
            ],
        ),
        group(
            "AM",
            vec![
                bundle(
                    "chance_creation",
                    &["stats_passing__KP", "stats_passing__xAG", "stats_gca__SCA.SCA90"],
                ),
                bundle(
                    "ball_carrying",
                    &[
                        "stats_possession__Take_Ons.Att",
                        "stats_possession__Take_Ons.Succ%",
                        "stats_possession__Carries.PrgC",
                    ],
                ),
                bundle(
                    "goal_threat",
                    &["Per_90_Minutes.xG", "Per_90_Minutes.Gls", "stats_shooting__Standard.Sh/90"],
                ),
                bundle("box_presence", &["stats_possession__Touches.Att_Pen"]),
                bundle("crossing", &["stats_passing__CrsPA"]),
            ],
        ),
        group(
            "ST",
            vec![
                bundle(
                    "finishing",
                    &["Per_90_Minutes.Gls", "Per_90_Minutes.npxG", "stats_shooting__Standard.G/Sh"],
                ),
                bundle(
                    "shot_volume",
                    &["stats_shooting__Standard.Sh/90", "stats_shooting__Standard.SoT/90"],
                ),
                bundle(
                    "movement",
                    &["stats_possession__Touches.Att_Pen", "stats_possession__Carries.PrgC"],
                ),
                bundle("link_up", &["stats_passing__KP", "stats_passing__xAG"]),
                bundle("pressing", &["stats_defense__Tackles.Att_3rd"]),
            ],
        ),
    ],
});
