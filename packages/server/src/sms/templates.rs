use chrono::{DateTime, FixedOffset, Utc};
use common::SmsIntent;

/// Languages messages are rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    Sv,
    En,
}

impl Locale {
    /// Swedish unless the tag is English.
    pub fn from_tag(tag: &str) -> Self {
        let primary = tag.split(['-', '_']).next().unwrap_or_default();
        if primary.eq_ignore_ascii_case("en") {
            Self::En
        } else {
            Self::Sv
        }
    }
}

/// The pickup a parcel-scoped message talks about.
#[derive(Debug, Clone)]
pub struct PickupDetails {
    pub location_name: String,
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

struct Window {
    date: String,
    start: String,
    end: String,
}

impl PickupDetails {
    fn window(&self, offset: FixedOffset) -> Window {
        let start = self.earliest.with_timezone(&offset);
        let end = self.latest.with_timezone(&offset);
        Window {
            date: start.format("%Y-%m-%d").to_string(),
            start: start.format("%H:%M").to_string(),
            end: end.format("%H:%M").to_string(),
        }
    }
}

/// Render the body of a message.
pub fn render(
    intent: SmsIntent,
    locale: Locale,
    first_name: &str,
    pickup: Option<&PickupDetails>,
    offset: FixedOffset,
) -> String {
    let name = first_name.trim();

    match (intent, pickup) {
        (SmsIntent::PickupReminder, Some(p)) => {
            let w = p.window(offset);
            match locale {
                Locale::Sv => format!(
                    "Hej {name}! Påminnelse: ditt matpaket kan hämtas {} kl {}-{} på {}.",
                    w.date, w.start, w.end, p.location_name
                ),
                Locale::En => format!(
                    "Hi {name}! Reminder: your food parcel can be collected on {} between {} and {} at {}.",
                    w.date, w.start, w.end, p.location_name
                ),
            }
        }
        (SmsIntent::PickupUpdated, Some(p)) => {
            let w = p.window(offset);
            match locale {
                Locale::Sv => format!(
                    "Hej {name}! Din hämtning har ändrats. Ny tid: {} kl {}-{} på {}.",
                    w.date, w.start, w.end, p.location_name
                ),
                Locale::En => format!(
                    "Hi {name}! Your pickup has changed. New time: {} between {} and {} at {}.",
                    w.date, w.start, w.end, p.location_name
                ),
            }
        }
        (SmsIntent::PickupCancelled, Some(p)) => {
            let w = p.window(offset);
            match locale {
                Locale::Sv => format!(
                    "Hej {name}! Din hämtning {} kl {}-{} är inställd.",
                    w.date, w.start, w.end
                ),
                Locale::En => format!(
                    "Hi {name}! Your pickup on {} at {}-{} has been cancelled.",
                    w.date, w.start, w.end
                ),
            }
        }
        (SmsIntent::PickupReminder | SmsIntent::PickupUpdated, None) => match locale {
            Locale::Sv => format!("Hej {name}! Du har ett matpaket att hämta."),
            Locale::En => format!("Hi {name}! You have a food parcel to collect."),
        },
        (SmsIntent::PickupCancelled, None) => match locale {
            Locale::Sv => format!("Hej {name}! Din hämtning är inställd."),
            Locale::En => format!("Hi {name}! Your pickup has been cancelled."),
        },
        (SmsIntent::FoodParcelsEnded, _) => match locale {
            Locale::Sv => format!(
                "Hej {name}! Du har inga fler matpaket inbokade. Hör av dig till oss om du behöver fortsatt stöd."
            ),
            Locale::En => format!(
                "Hi {name}! You have no more food parcels booked. Get in touch if you still need support."
            ),
        },
        (SmsIntent::ConsentEnrolment, _) => match locale {
            Locale::Sv => format!(
                "Hej {name}! Du är nu registrerad för matpaket. Vi skickar påminnelser via SMS och sparar bara de uppgifter som behövs."
            ),
            Locale::En => format!(
                "Hi {name}! You are now registered for food parcels. We send reminders by SMS and only keep the data we need."
            ),
        },
    }
}
