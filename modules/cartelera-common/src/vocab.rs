//! Controlled category vocabulary and model slots.
//!
//! Each category carries a Spanish prose description; the classifier embeds
//! the description once per vocabulary version and compares event embeddings
//! against it. Changing any description must bump `VOCAB_VERSION` so the
//! cached reference embeddings are recomputed.

/// Bumped whenever the category set or a description changes.
pub const VOCAB_VERSION: &str = "2026-03";

/// Primary slug assigned when neither the classifier nor the enricher
/// produced a category.
pub const FALLBACK_CATEGORY: &str = "otros";

#[derive(Debug, Clone, Copy)]
pub struct Category {
    pub slug: &'static str,
    /// Embedding prompt: what events under this slug look like.
    pub description: &'static str,
}

pub const CATEGORIES: &[Category] = &[
    Category {
        slug: "cultural",
        description: "Eventos culturales y artísticos: conciertos, teatro, danza, cine, \
                      exposiciones, literatura, festivales de música y artes escénicas",
    },
    Category {
        slug: "social",
        description: "Encuentros sociales y comunitarios: fiestas populares, verbenas, \
                      ferias de barrio, actividades vecinales y voluntariado",
    },
    Category {
        slug: "economica",
        description: "Actividad económica y profesional: ferias comerciales, mercados, \
                      jornadas de empleo, networking y emprendimiento",
    },
    Category {
        slug: "politica",
        description: "Vida política e institucional: plenos municipales, debates, \
                      audiencias públicas y actos institucionales",
    },
    Category {
        slug: "sanitaria",
        description: "Salud y bienestar: jornadas de salud, donación de sangre, \
                      charlas sanitarias, actividades de prevención",
    },
    Category {
        slug: "tecnologia",
        description: "Tecnología e innovación: hackatones, charlas técnicas, talleres \
                      de programación, divulgación científica y digital",
    },
    Category {
        slug: "educativa",
        description: "Formación y educación: talleres, cursos, conferencias académicas, \
                      actividades infantiles y familiares de aprendizaje",
    },
    Category {
        slug: "deportiva",
        description: "Deporte y actividad física: carreras populares, torneos, \
                      exhibiciones deportivas, rutas y senderismo",
    },
    Category {
        slug: "medioambiental",
        description: "Medio ambiente y naturaleza: limpiezas, reforestaciones, \
                      actividades de conservación y educación ambiental",
    },
    Category {
        slug: "otros",
        description: "Eventos que no encajan en ninguna otra categoría",
    },
];

/// Returns true when the slug belongs to the controlled vocabulary.
pub fn is_valid_slug(slug: &str) -> bool {
    CATEGORIES.iter().any(|c| c.slug == slug)
}

// --- Model slots ---

/// Logical chat-model slot, selected by source tier. The concrete model names
/// come from configuration; these are the three quality rungs plus a small
/// model reserved for coarse filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSlot {
    Oro,
    Plata,
    Bronce,
    Filter,
}

impl ModelSlot {
    pub fn for_tier(tier: crate::sources::SourceTier) -> Self {
        match tier {
            crate::sources::SourceTier::Gold => ModelSlot::Oro,
            crate::sources::SourceTier::Silver => ModelSlot::Plata,
            crate::sources::SourceTier::Bronze => ModelSlot::Bronce,
        }
    }
}
