//! Registry of the application's logical collections.
//!
//! The registry is an immutable table built once at startup and shared by
//! reference between the inventory, the exporter and the compatibility
//! validator.

use std::fmt;

/// A logical collection known to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDef {
    /// Logical (model) name, e.g. `Meal`.
    pub logical_name: &'static str,
    /// Collection name in the store, e.g. `meals`.
    pub collection: &'static str,
    /// Declared record fields.
    pub fields: &'static [&'static str],
}

impl fmt::Display for CollectionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.logical_name, self.collection)
    }
}

/// `_id`, the given fields, then the `createdAt`/`updatedAt` timestamps.
macro_rules! fields {
    ($($f:literal),* $(,)?) => {
        &["_id", $($f,)* "createdAt", "updatedAt"]
    };
}

const MEAL_PLANNER: &[CollectionDef] = &[
    CollectionDef {
        logical_name: "User",
        collection: "users",
        fields: fields!["name", "email", "password", "role"],
    },
    CollectionDef {
        logical_name: "Meal",
        collection: "meals",
        fields: fields![
            "name",
            "description",
            "ingredients",
            "instructions",
            "prepTime",
            "cookTime",
            "servings",
            "tags",
            "createdBy",
        ],
    },
    CollectionDef {
        logical_name: "Ingredient",
        collection: "ingredients",
        fields: fields!["name", "category", "unit", "store", "price"],
    },
    CollectionDef {
        logical_name: "Store",
        collection: "stores",
        fields: fields!["name", "address", "location"],
    },
    CollectionDef {
        logical_name: "FamilyMember",
        collection: "familymembers",
        fields: fields!["name", "email", "role", "dietaryRestrictions", "preferences"],
    },
    CollectionDef {
        logical_name: "MealPlan",
        collection: "mealplans",
        fields: fields!["date", "mealType", "meal", "familyMember", "notes"],
    },
    CollectionDef {
        logical_name: "ShoppingList",
        collection: "shoppinglists",
        fields: fields!["name", "items", "store", "createdBy"],
    },
    CollectionDef {
        logical_name: "Audit",
        collection: "audits",
        fields: &[
            "_id",
            "action",
            "status",
            "actorId",
            "actorType",
            "timestamp",
            "ipAddress",
            "userAgent",
            "failureReason",
        ],
    },
];

/// Immutable table of collection definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRegistry {
    defs: Vec<CollectionDef>,
}

impl CollectionRegistry {
    /// Creates a registry from explicit definitions.
    #[must_use]
    pub fn new(defs: Vec<CollectionDef>) -> Self {
        Self { defs }
    }

    /// The meal planner's collections.
    #[must_use]
    pub fn meal_planner() -> Self {
        Self::new(MEAL_PLANNER.to_vec())
    }

    /// Looks up a definition by logical name or store collection name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CollectionDef> {
        self.defs
            .iter()
            .find(|d| d.logical_name == name || d.collection == name)
    }

    /// Returns true if `name` is a registered logical or collection name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over all definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CollectionDef> {
        self.defs.iter()
    }

    /// Logical names in registration order.
    #[must_use]
    pub fn logical_names(&self) -> Vec<&'static str> {
        self.defs.iter().map(|d| d.logical_name).collect()
    }

    /// Resolves a selection to definitions.
    ///
    /// An empty selection means every collection. Unknown names are dropped,
    /// duplicates collapse, and registration order is kept.
    #[must_use]
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Vec<&CollectionDef> {
        if names.is_empty() {
            return self.defs.iter().collect();
        }
        self.defs
            .iter()
            .filter(|d| {
                names
                    .iter()
                    .any(|n| n.as_ref() == d.logical_name || n.as_ref() == d.collection)
            })
            .collect()
    }

    /// Number of registered collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Returns true if no collections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::meal_planner()
    }
}
