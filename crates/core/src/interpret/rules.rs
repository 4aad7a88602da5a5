//! Deterministic validation and extraction rules for each phase. These are
//! the fallback when the oracle's proposal is missing or out of domain.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::session::{LicenseStatus, LicenseType};
use crate::domain::vehicle::VehicleUse;

pub const AFFIRMATIVE: [&str; 19] = [
    "yes", "y", "ye", "yeah", "yea", "yeh", "yep", "yup", "sure", "ok", "okay", "k", "true",
    "correct", "absolutely", "definitely", "affirmative", "sure thing", "of course",
];

pub const NEGATIVE: [&str; 8] =
    ["no", "n", "nah", "nope", "false", "incorrect", "negative", "not really"];

pub const KNOWN_BODY_TYPES: [&str; 11] = [
    "sedan",
    "suv",
    "truck",
    "coupe",
    "hatchback",
    "wagon",
    "van",
    "minivan",
    "convertible",
    "pickup",
    "crossover",
];

static YEAR_MAKE_BODY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(19\d{2}|20[0-2]\d)\s+([A-Za-z][\w-]*)(?:\s+([A-Za-z][\w-]*))?(?:\s+([A-Za-z][\w-]*))?")
        .expect("valid year make body regex")
});
static FIRST_INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("valid integer regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct YearMakeBody {
    pub year: i32,
    pub make: String,
    pub body_type: String,
}

pub fn zip_code(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (trimmed.len() == 5 && trimmed.bytes().all(|byte| byte.is_ascii_digit()))
        .then(|| trimmed.to_string())
}

/// Strips hyphens and spaces; a VIN is then exactly 17 ASCII alphanumerics.
pub fn normalize_vin(text: &str) -> Option<String> {
    let stripped: String =
        text.trim().chars().filter(|character| *character != '-' && *character != ' ').collect();
    (stripped.len() == 17 && stripped.chars().all(|character| character.is_ascii_alphanumeric()))
        .then(|| stripped.to_ascii_uppercase())
}

pub fn year_make_body(text: &str) -> Option<YearMakeBody> {
    let captures = YEAR_MAKE_BODY_RE.captures(text)?;
    let year = captures.get(1)?.as_str().parse::<i32>().ok()?;
    let first = captures.get(2)?.as_str();
    let second = captures.get(3).map(|found| found.as_str());
    let third = captures.get(4).map(|found| found.as_str());

    let found = |make: String, body: &str| YearMakeBody { year, make, body_type: body.to_string() };

    match (second, third) {
        (Some(body), _) if is_known_body(body) => Some(found(first.to_string(), body)),
        (Some(make_tail), Some(body)) if is_known_body(body) => {
            Some(found(format!("{first} {make_tail}"), body))
        }
        _ => {
            // Loose acceptance for body types outside the known list.
            if text.split_whitespace().count() < 3 {
                return None;
            }
            match (second, third) {
                (Some(make_tail), Some(body)) if body.len() > 2 => {
                    Some(found(format!("{first} {make_tail}"), body))
                }
                (Some(body), None) if body.len() > 2 => Some(found(first.to_string(), body)),
                _ => None,
            }
        }
    }
}

fn is_known_body(token: &str) -> bool {
    KNOWN_BODY_TYPES.contains(&token.to_ascii_lowercase().as_str())
}

/// Word-list yes/no reading used by the vehicle gate and the blind-spot
/// question.
pub fn yes_no(text: &str) -> Option<bool> {
    let lowered = text.trim().to_lowercase();
    let words: Vec<&str> = lowered
        .split(|character: char| !character.is_alphanumeric() && character != '\'')
        .filter(|word| !word.is_empty())
        .collect();
    if words.is_empty() {
        return None;
    }

    let joined = words.join(" ");
    if AFFIRMATIVE.contains(&joined.as_str()) {
        return Some(true);
    }
    if NEGATIVE.contains(&joined.as_str()) {
        return Some(false);
    }

    // "sure" is affirmative on its own, so the hedge has to win first.
    if contains_phrase(&words, "not sure") {
        return None;
    }

    let has_yes = AFFIRMATIVE.iter().any(|entry| contains_phrase(&words, entry));
    let has_no = NEGATIVE.iter().any(|entry| contains_phrase(&words, entry));

    match (has_yes, has_no) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        (true, true) => match words[0] {
            "no" if !words.contains(&"yes") => Some(false),
            "yes" if !words.contains(&"no") => Some(true),
            _ => None,
        },
        (false, false) => None,
    }
}

fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split(' ').collect();
    words.windows(parts.len()).any(|window| window == parts.as_slice())
}

pub fn license_type(text: &str) -> Option<LicenseType> {
    let lowered = text.trim().to_lowercase();
    let normalized = trim_trailing_punctuation(&lowered);
    if normalized.is_empty() {
        return None;
    }

    if let Some(exact) = LicenseType::ALL.iter().find(|kind| kind.as_str() == normalized) {
        return Some(*exact);
    }

    let prefixed: Vec<LicenseType> = LicenseType::ALL
        .into_iter()
        .filter(|kind| kind.as_str().starts_with(normalized))
        .collect();
    if let [only] = prefixed.as_slice() {
        return Some(*only);
    }

    let mentioned: Vec<LicenseType> =
        LicenseType::ALL.into_iter().filter(|kind| normalized.contains(kind.as_str())).collect();
    match mentioned.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Substring reading. "valid" is checked first, so a message such as
/// "it's invalid" also reads as valid.
pub fn license_status(text: &str) -> Option<LicenseStatus> {
    let lowered = text.to_lowercase();
    if lowered.contains("valid") {
        Some(LicenseStatus::Valid)
    } else if lowered.contains("suspended") {
        Some(LicenseStatus::Suspended)
    } else {
        None
    }
}

/// First integer token, thousands separators ignored.
pub fn first_integer(text: &str) -> Option<u32> {
    let token = FIRST_INTEGER_RE.find(text)?.as_str().replace(',', "");
    token.parse().ok()
}

pub fn commuting_days(text: &str) -> Option<u8> {
    first_integer(text).filter(|days| (1..=7).contains(days)).map(|days| days as u8)
}

pub fn positive_miles(text: &str) -> Option<u32> {
    first_integer(text).filter(|miles| *miles > 0)
}

pub fn vehicle_use(text: &str) -> Option<VehicleUse> {
    let lowered = text.trim().to_lowercase();
    VehicleUse::ALL.into_iter().find(|kind| kind.as_str() == lowered)
}

fn trim_trailing_punctuation(text: &str) -> &str {
    text.trim_end_matches(|character: char| character.is_ascii_punctuation()).trim_end()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        commuting_days, first_integer, license_status, license_type, normalize_vin,
        positive_miles, vehicle_use, year_make_body, yes_no, zip_code, YearMakeBody,
    };
    use crate::domain::session::{LicenseStatus, LicenseType};
    use crate::domain::vehicle::VehicleUse;

    #[test]
    fn zip_code_rejects_near_misses() {
        assert_eq!(zip_code("95014"), Some("95014".to_string()));
        assert_eq!(zip_code(" 95014 "), Some("95014".to_string()));
        for rejected in ["9501", "95014x", "abcde", "950145", "", "９５０１４"] {
            assert_eq!(zip_code(rejected), None, "{rejected}");
        }
    }

    #[test]
    fn vin_ignores_hyphens_and_spaces() {
        assert_eq!(normalize_vin("1hgcm82633a004352"), Some("1HGCM82633A004352".to_string()));
        assert_eq!(normalize_vin("1HG-CM826 33A004352"), Some("1HGCM82633A004352".to_string()));
        assert_eq!(normalize_vin("1HGCM82633A00435"), None);
        assert_eq!(normalize_vin("1HGCM82633A00435_"), None);
    }

    #[test]
    fn year_make_body_prefers_known_body_types() {
        assert_eq!(
            year_make_body("2019 Ford Sedan"),
            Some(YearMakeBody { year: 2019, make: "Ford".into(), body_type: "Sedan".into() })
        );
        assert_eq!(
            year_make_body("my 2020 Land Rover SUV"),
            Some(YearMakeBody { year: 2020, make: "Land Rover".into(), body_type: "SUV".into() })
        );
        assert_eq!(
            year_make_body("2018 Ford Mustang"),
            Some(YearMakeBody { year: 2018, make: "Ford".into(), body_type: "Mustang".into() })
        );
    }

    #[test]
    fn year_make_body_requires_body_and_plausible_year() {
        assert_eq!(year_make_body("2020 Toyota"), None);
        assert_eq!(year_make_body("1850 Ford Sedan"), None);
        assert_eq!(year_make_body("2035 Ford Sedan"), None);
        assert_eq!(year_make_body("2019 Ford XL"), None);
    }

    #[test]
    fn yes_no_reads_word_lists() {
        for affirmative in ["yes", "Yeah!", "sure thing", "of course", "k", "Yep, let's do it"] {
            assert_eq!(yes_no(affirmative), Some(true), "{affirmative}");
        }
        for negative in ["no", "Nope.", "not really", "nah I'm good", "false"] {
            assert_eq!(yes_no(negative), Some(false), "{negative}");
        }
        assert_eq!(yes_no("maybe later"), None);
        assert_eq!(yes_no("not sure"), None);
        assert_eq!(yes_no("I'm not sure, sorry"), None);
        assert_eq!(yes_no(""), None);
    }

    #[test]
    fn yes_no_breaks_ties_on_leading_word() {
        assert_eq!(yes_no("no, I'm ok"), Some(false));
        assert_eq!(yes_no("yes, not really sure"), Some(true));
        assert_eq!(yes_no("ok no"), None);
        assert_eq!(yes_no("no yes"), None);
    }

    #[test]
    fn license_type_matches_exact_prefix_then_single_mention() {
        assert_eq!(license_type("Personal."), Some(LicenseType::Personal));
        assert_eq!(license_type("comm"), Some(LicenseType::Commercial));
        assert_eq!(license_type("I hold a foreign license"), Some(LicenseType::Foreign));
        assert_eq!(license_type("personal or commercial"), None);
        assert_eq!(license_type("learner"), None);
    }

    #[test]
    fn license_status_matches_valid_inside_other_words() {
        assert_eq!(license_status("I have a valid license"), Some(LicenseStatus::Valid));
        assert_eq!(license_status("It is invalid"), Some(LicenseStatus::Valid));
        assert_eq!(license_status("currently Suspended"), Some(LicenseStatus::Suspended));
        assert_eq!(license_status("expired"), None);
    }

    #[test]
    fn numbers_use_first_integer_token() {
        assert_eq!(first_integer("about 12,000 miles a year"), Some(12_000));
        assert_eq!(commuting_days("3 days"), Some(3));
        assert_eq!(commuting_days("8"), None);
        assert_eq!(commuting_days("0"), None);
        assert_eq!(positive_miles("12"), Some(12));
        assert_eq!(positive_miles("zero"), None);
    }

    #[test]
    fn vehicle_use_is_an_exact_cast() {
        assert_eq!(vehicle_use(" Commuting "), Some(VehicleUse::Commuting));
        assert_eq!(vehicle_use("for commuting"), None);
    }

    proptest! {
        #[test]
        fn prop_zip_accepts_exactly_five_digits(digits in "[0-9]{0,9}") {
            prop_assert_eq!(zip_code(&digits).is_some(), digits.len() == 5);
        }

        #[test]
        fn prop_vin_accepts_seventeen_alphanumerics_with_separators(
            vin in "[A-Z0-9]{17}",
            split in 1usize..16,
        ) {
            let separated = format!("{}-{} ", &vin[..split], &vin[split..]);
            prop_assert_eq!(normalize_vin(&separated), Some(vin));
        }

        #[test]
        fn prop_vin_rejects_other_lengths(vin in "[A-Z0-9]{1,30}") {
            prop_assume!(vin.len() != 17);
            prop_assert_eq!(normalize_vin(&vin), None);
        }
    }
}
