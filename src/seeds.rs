//! Built-in scenarios that make the app useful without any scenarios file.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::domain::{
  ConversationRole, ConversationScenario, ScenarioCategory, ScenarioDifficulty, ScenarioPhase,
};

fn strs(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

fn context(pairs: &[(&str, &str)]) -> Map<String, Value> {
  pairs.iter().map(|(k, v)| (k.to_string(), Value::String(v.to_string()))).collect()
}

struct PhaseSeed<'a> {
  id: &'a str,
  name: &'a str,
  description: &'a str,
  minutes: u32,
  vocabulary: &'a [&'a str],
  phrases: &'a [&'a str],
  objectives: &'a [&'a str],
  note: Option<&'a str>,
  criteria: &'a [&'a str],
}

impl PhaseSeed<'_> {
  fn build(&self) -> ScenarioPhase {
    ScenarioPhase {
      phase_id: self.id.into(),
      name: self.name.into(),
      description: self.description.into(),
      expected_duration_minutes: self.minutes,
      key_vocabulary: strs(self.vocabulary),
      essential_phrases: strs(self.phrases),
      learning_objectives: strs(self.objectives),
      cultural_notes: self.note.map(str::to_string),
      success_criteria: strs(self.criteria),
    }
  }
}

/// The three scenarios every installation starts with.
pub fn predefined_scenarios() -> Vec<ConversationScenario> {
  vec![restaurant_reservation(), hotel_check_in(), clothing_shopping()]
}

fn restaurant_reservation() -> ConversationScenario {
  let now = Utc::now();
  ConversationScenario {
    scenario_id: "restaurant_dinner_reservation".into(),
    name: "Making a Dinner Reservation".into(),
    category: ScenarioCategory::Restaurant,
    difficulty: ScenarioDifficulty::Beginner,
    description: "Practice making a dinner reservation at a restaurant, ordering food, and handling the bill.".into(),
    user_role: ConversationRole::Customer,
    ai_role: ConversationRole::ServiceProvider,
    setting: "An upscale restaurant in the city center".into(),
    duration_minutes: 15,
    phases: vec![
      PhaseSeed {
        id: "reservation",
        name: "Making the Reservation",
        description: "Call or visit to make a dinner reservation",
        minutes: 3,
        vocabulary: &["reservation", "table", "party", "time", "available"],
        phrases: &[
          "I'd like to make a reservation",
          "For how many people?",
          "What time would you prefer?",
          "We have availability at...",
        ],
        objectives: &[
          "Use polite language for requests",
          "Understand time expressions",
          "Handle scheduling conflicts",
        ],
        note: Some("In many cultures, advance reservations are expected for dinner at upscale restaurants."),
        criteria: &[
          "Successfully request a reservation",
          "Provide party size and preferred time",
          "Confirm reservation details",
        ],
      }
      .build(),
      PhaseSeed {
        id: "arrival_seating",
        name: "Arrival and Seating",
        description: "Arrive at the restaurant and get seated",
        minutes: 2,
        vocabulary: &["host", "hostess", "table", "booth", "window", "ready"],
        phrases: &[
          "We have a reservation under...",
          "Right this way, please",
          "Your table is ready",
          "Would you prefer a table or booth?",
        ],
        objectives: &["Check in for reservation", "Express seating preferences", "Follow directions"],
        note: None,
        criteria: &[
          "Check in with reservation name",
          "Follow host to table",
          "Express any seating preferences",
        ],
      }
      .build(),
      PhaseSeed {
        id: "ordering",
        name: "Ordering Food and Drinks",
        description: "Review menu and place your order",
        minutes: 7,
        vocabulary: &["menu", "appetizer", "entrée", "beverage", "special", "allergy"],
        phrases: &[
          "What would you recommend?",
          "I'll have the...",
          "How is that prepared?",
          "Any allergies or dietary restrictions?",
        ],
        objectives: &[
          "Ask for recommendations",
          "Place complete order",
          "Ask about food preparation",
          "Communicate dietary needs",
        ],
        note: None,
        criteria: &[
          "Order appetizer and main course",
          "Ask at least one question about the menu",
          "Choose appropriate beverages",
        ],
      }
      .build(),
      PhaseSeed {
        id: "payment",
        name: "Paying the Bill",
        description: "Review bill, tip appropriately, and complete payment",
        minutes: 3,
        vocabulary: &["bill", "check", "tip", "credit card", "cash", "receipt"],
        phrases: &[
          "Could we have the check, please?",
          "Is tip included?",
          "I'll pay with credit card",
          "Thank you for excellent service",
        ],
        objectives: &[
          "Request the bill politely",
          "Understand tipping customs",
          "Complete payment transaction",
          "Express satisfaction",
        ],
        note: None,
        criteria: &[
          "Request and review the bill",
          "Calculate and add appropriate tip",
          "Complete payment successfully",
        ],
      }
      .build(),
    ],
    vocabulary_focus: strs(&[
      "reservation", "table", "menu", "order", "waiter", "waitress", "appetizer", "entrée", "dessert",
      "beverage", "bill", "tip",
    ]),
    cultural_context: context(&[
      ("tipping_culture", "Standard tip is 15-20% for good service"),
      ("dining_etiquette", "Wait for everyone to be served before eating"),
      ("payment_customs", "Usually one person pays for the group"),
    ]),
    learning_goals: strs(&[
      "Navigate restaurant interactions confidently",
      "Use polite service language",
      "Understand dining cultural norms",
    ]),
    learning_outcomes: Vec::new(),
    prerequisites: strs(&["basic_greetings", "numbers", "time_expressions"]),
    is_active: true,
    created_at: now,
    updated_at: now,
  }
}

fn hotel_check_in() -> ConversationScenario {
  let now = Utc::now();
  ConversationScenario {
    scenario_id: "hotel_check_in".into(),
    name: "Hotel Check-in Process".into(),
    category: ScenarioCategory::Travel,
    difficulty: ScenarioDifficulty::Intermediate,
    description: "Check into a hotel, handle room requests, and get local information.".into(),
    user_role: ConversationRole::Tourist,
    ai_role: ConversationRole::ServiceProvider,
    setting: "Hotel reception desk in a foreign country".into(),
    duration_minutes: 12,
    phases: vec![
      PhaseSeed {
        id: "check_in",
        name: "Hotel Check-in",
        description: "Provide reservation details and complete check-in process",
        minutes: 4,
        vocabulary: &["reservation", "passport", "ID", "confirmation", "room key"],
        phrases: &[
          "I have a reservation under...",
          "Could I see your ID please?",
          "Here's your room key",
          "Your room is on the third floor",
        ],
        objectives: &[
          "Present reservation information",
          "Understand check-in procedures",
          "Handle document requests",
        ],
        note: None,
        criteria: &[
          "Provide reservation details",
          "Present required documents",
          "Receive room assignment",
        ],
      }
      .build(),
      PhaseSeed {
        id: "room_preferences",
        name: "Room Preferences and Requests",
        description: "Discuss room features and make special requests",
        minutes: 3,
        vocabulary: &["view", "balcony", "smoking", "non-smoking", "upgrade", "amenities"],
        phrases: &[
          "Is there a room with a view?",
          "Could I request a non-smoking room?",
          "Are there any upgrades available?",
          "What amenities are included?",
        ],
        objectives: &[
          "Express preferences politely",
          "Ask about available options",
          "Understand room features",
        ],
        note: None,
        criteria: &[
          "Make at least one room preference request",
          "Ask about hotel amenities",
          "Understand upgrade options",
        ],
      }
      .build(),
      PhaseSeed {
        id: "local_information",
        name: "Getting Local Information",
        description: "Ask for directions and recommendations for local attractions",
        minutes: 5,
        vocabulary: &["directions", "restaurant", "tourist", "attraction", "transportation", "map"],
        phrases: &[
          "What would you recommend for sightseeing?",
          "How do I get to...?",
          "Are there good restaurants nearby?",
          "Could you mark it on the map?",
        ],
        objectives: &["Ask for recommendations", "Understand directions", "Get local insights"],
        note: None,
        criteria: &[
          "Ask for restaurant recommendations",
          "Get directions to at least one attraction",
          "Understand transportation options",
        ],
      }
      .build(),
    ],
    vocabulary_focus: strs(&[
      "reservation", "check-in", "passport", "room", "key", "floor", "elevator", "directions", "restaurant",
      "attraction", "map",
    ]),
    cultural_context: context(&[
      ("hospitality_customs", "Hotel staff are usually very helpful with tourist information"),
      ("tipping_culture", "Small tips for helpful service are appreciated"),
      ("local_etiquette", "Always be polite and patient with language barriers"),
    ]),
    learning_goals: strs(&[
      "Handle travel check-in procedures",
      "Ask for local recommendations",
      "Navigate tourist interactions",
    ]),
    learning_outcomes: Vec::new(),
    prerequisites: strs(&["travel_vocabulary", "directions", "polite_requests"]),
    is_active: true,
    created_at: now,
    updated_at: now,
  }
}

fn clothing_shopping() -> ConversationScenario {
  let now = Utc::now();
  ConversationScenario {
    scenario_id: "clothing_shopping".into(),
    name: "Clothes Shopping Experience".into(),
    category: ScenarioCategory::Shopping,
    difficulty: ScenarioDifficulty::Beginner,
    description: "Shop for clothes, try on items, and make purchases.".into(),
    user_role: ConversationRole::Customer,
    ai_role: ConversationRole::ServiceProvider,
    setting: "Clothing store in a shopping mall".into(),
    duration_minutes: 10,
    phases: vec![
      PhaseSeed {
        id: "browsing",
        name: "Browsing and Initial Inquiry",
        description: "Look around the store and ask for help",
        minutes: 3,
        vocabulary: &["size", "color", "style", "price", "section", "looking for"],
        phrases: &[
          "I'm looking for...",
          "What size do you need?",
          "Do you have this in blue?",
          "Where can I find...?",
        ],
        objectives: &[
          "Express what you're looking for",
          "Ask about sizes and colors",
          "Navigate store layout",
        ],
        note: None,
        criteria: &[
          "Ask for help finding items",
          "Specify size and color preferences",
          "Understand store organization",
        ],
      }
      .build(),
      PhaseSeed {
        id: "trying_on",
        name: "Trying on Clothes",
        description: "Use fitting room and get feedback on fit",
        minutes: 4,
        vocabulary: &["fitting room", "try on", "fit", "tight", "loose", "perfect"],
        phrases: &[
          "Where are the fitting rooms?",
          "How does it fit?",
          "It's a bit tight",
          "Do you have a larger size?",
        ],
        objectives: &["Use fitting room facilities", "Describe how clothes fit", "Ask for different sizes"],
        note: None,
        criteria: &[
          "Successfully use fitting room",
          "Describe fit using appropriate vocabulary",
          "Request size adjustments",
        ],
      }
      .build(),
      PhaseSeed {
        id: "purchasing",
        name: "Making the Purchase",
        description: "Decide on items and complete the purchase",
        minutes: 3,
        vocabulary: &["buy", "purchase", "receipt", "credit card", "cash", "total"],
        phrases: &[
          "I'll take this one",
          "How much is the total?",
          "Do you accept credit cards?",
          "Could I have a receipt?",
        ],
        objectives: &["Make purchase decisions", "Handle payment process", "Get transaction documentation"],
        note: None,
        criteria: &[
          "Decide on items to purchase",
          "Complete payment successfully",
          "Receive receipt and items",
        ],
      }
      .build(),
    ],
    vocabulary_focus: strs(&[
      "clothes", "shirt", "pants", "dress", "shoes", "size", "color", "fitting room", "try on", "buy", "price",
      "receipt",
    ]),
    cultural_context: context(&[
      ("shopping_etiquette", "It's normal to try on clothes before buying"),
      ("payment_methods", "Most stores accept both cash and cards"),
      ("return_policy", "Keep receipts for returns or exchanges"),
    ]),
    learning_goals: strs(&[
      "Shop for personal items confidently",
      "Describe clothing and fit",
      "Handle retail transactions",
    ]),
    learning_outcomes: Vec::new(),
    prerequisites: strs(&["colors", "numbers", "clothing_vocabulary"]),
    is_active: true,
    created_at: now,
    updated_at: now,
  }
}
