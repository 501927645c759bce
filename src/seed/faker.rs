//! Dummy data for seeders.

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Barbara", "Dennis", "Edsger", "Frances", "Grace", "Guido", "Hedy", "Ken",
    "Linus", "Margaret", "Niklaus", "Radia", "Sophie", "Tim", "Yukihiro", "Donald",
];

const LAST_NAMES: &[&str] = &[
    "Lovelace", "Turing", "Liskov", "Ritchie", "Dijkstra", "Allen", "Hopper", "Rossum", "Lamarr",
    "Thompson", "Torvalds", "Hamilton", "Wirth", "Perlman", "Wilson", "Berners", "Matsumoto",
    "Knuth",
];

const STREETS: &[&str] = &[
    "Main Street", "High Street", "Church Road", "Station Road", "Park Avenue", "Mill Lane",
    "Victoria Road", "Elm Street",
];

const CITIES: &[&str] = &[
    "Springfield", "Riverside", "Fairview", "Franklin", "Greenville", "Bristol", "Clinton",
    "Madison",
];

const COMPANY_WORDS: &[&str] = &[
    "Acme", "Globex", "Initech", "Umbrella", "Stark", "Wayne", "Cyberdyne", "Soylent", "Hooli",
    "Vandelay",
];

const COMPANY_SUFFIXES: &[&str] = &["Inc", "LLC", "Ltd", "Group", "Systems", "Labs"];

const DOMAINS: &[&str] = &["example.com", "example.org", "example.net", "test.dev"];

const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua", "enim",
    "minim", "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi",
];

/// Random values for common field types.
///
/// Methods take `&self`; the generator is behind a mutex so a faker can be
/// shared by a seeder across awaits.
#[derive(Debug)]
pub struct Faker {
    rng: Mutex<StdRng>,
}

impl Default for Faker {
    fn default() -> Self {
        Self::new()
    }
}

impl Faker {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// A reproducible faker.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn pick(&self, items: &[&'static str]) -> &'static str {
        items.choose(&mut *self.rng.lock()).copied().unwrap_or_default()
    }

    pub fn first_name(&self) -> String {
        self.pick(FIRST_NAMES).to_string()
    }

    pub fn last_name(&self) -> String {
        self.pick(LAST_NAMES).to_string()
    }

    pub fn name(&self) -> String {
        format!("{} {}", self.first_name(), self.last_name())
    }

    pub fn email(&self) -> String {
        format!(
            "{}.{}{}@{}",
            self.first_name().to_ascii_lowercase(),
            self.last_name().to_ascii_lowercase(),
            self.number(1, 9999),
            self.pick(DOMAINS)
        )
    }

    pub fn phone(&self) -> String {
        format!(
            "+1-{:03}-{:03}-{:04}",
            self.number(200, 999),
            self.number(100, 999),
            self.number(0, 9999)
        )
    }

    pub fn address(&self) -> String {
        format!(
            "{} {}, {} {:05}",
            self.number(1, 999),
            self.pick(STREETS),
            self.pick(CITIES),
            self.number(10000, 99999)
        )
    }

    pub fn company(&self) -> String {
        format!("{} {}", self.pick(COMPANY_WORDS), self.pick(COMPANY_SUFFIXES))
    }

    /// `count` space-separated words.
    pub fn words(&self, count: usize) -> String {
        (0..count).map(|_| self.pick(WORDS)).collect::<Vec<_>>().join(" ")
    }

    /// A capitalised sentence ending in a period.
    pub fn sentence(&self) -> String {
        let count = self.number(4, 12) as usize;
        let words = self.words(count);
        let mut chars = words.chars();
        match chars.next() {
            Some(first) => format!("{}{}.", first.to_ascii_uppercase(), chars.as_str()),
            None => String::new(),
        }
    }

    /// Sentences up to roughly `max_chars` characters.
    pub fn text(&self, max_chars: usize) -> String {
        let mut text = String::new();
        loop {
            let sentence = self.sentence();
            if !text.is_empty() && text.len() + sentence.len() + 1 > max_chars {
                break;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&sentence);
            if text.len() >= max_chars {
                break;
            }
        }
        text
    }

    /// Integer in `min..=max`.
    pub fn number(&self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        self.rng.lock().gen_range(min..=max)
    }

    pub fn float(&self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        self.rng.lock().gen_range(min..max)
    }

    pub fn boolean(&self) -> bool {
        self.rng.lock().gen_bool(0.5)
    }

    /// A date within the last ten years.
    pub fn date(&self) -> NaiveDate {
        let days = self.number(0, 3650);
        (Utc::now() - Duration::days(days)).date_naive()
    }

    pub fn date_time(&self) -> NaiveDateTime {
        let seconds = self.number(0, 3650 * 86_400);
        (Utc::now() - Duration::seconds(seconds)).naive_utc()
    }

    pub fn uuid(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Alphanumeric identifier of `len` characters.
    pub fn identifier(&self, len: usize) -> String {
        let mut rng = self.rng.lock();
        (&mut *rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_faker_is_reproducible() {
        let a = Faker::seeded(7);
        let b = Faker::seeded(7);
        assert_eq!(a.name(), b.name());
        assert_eq!(a.email(), b.email());
        assert_eq!(a.identifier(12), b.identifier(12));
    }

    #[test]
    fn test_shapes() {
        let faker = Faker::seeded(1);
        assert!(faker.email().contains('@'));
        assert!(faker.phone().starts_with("+1-"));
        assert_eq!(faker.identifier(16).len(), 16);
        assert!(faker.sentence().ends_with('.'));
        assert!(!faker.text(200).is_empty());
        for _ in 0..100 {
            let n = faker.number(3, 5);
            assert!((3..=5).contains(&n));
        }
        assert_eq!(faker.number(9, 9), 9);
        assert!(faker.date() <= Utc::now().date_naive());
        assert_eq!(faker.uuid().len(), 36);
        assert!(faker.address().contains(", "));
        assert_eq!(faker.company().split(' ').count(), 2);
        assert_eq!(faker.words(4).split(' ').count(), 4);
    }
}
