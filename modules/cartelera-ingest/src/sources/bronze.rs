//! Bronze sources: rendered listing pages scraped by selector.

use cartelera_common::{BronzeSource, SourceConfig};

use super::meta;

pub(super) fn sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::Bronze(viralagenda_valladolid()),
        SourceConfig::Bronze(viralagenda_leon()),
        SourceConfig::Bronze(tenerife()),
        SourceConfig::Bronze(santiago()),
    ]
}

fn viralagenda(slug: &str, name: &str, city: &str, province: &str) -> BronzeSource {
    BronzeSource {
        meta: meta(slug, name, "Castilla y León", "07"),
        listing_url: format!(
            "https://www.viralagenda.com/es/{}",
            city.to_lowercase().replace(' ', "-")
        ),
        province: Some(province.to_string()),
        city: Some(city.to_string()),
        use_renderer: true,
        wait_for: Some(".viral-event".to_string()),
        card_selector: ".viral-event".to_string(),
        title_selector: ".viral-event-title".to_string(),
        date_selector: ".viral-event-date".to_string(),
        link_selector: "a.viral-event-link".to_string(),
        image_selector: ".viral-event-image img".to_string(),
        fetch_details: true,
        max_pages: 3,
    }
}

fn viralagenda_valladolid() -> BronzeSource {
    viralagenda(
        "viralagenda_valladolid",
        "Viralagenda Valladolid",
        "Valladolid",
        "Valladolid",
    )
}

fn viralagenda_leon() -> BronzeSource {
    viralagenda("viralagenda_leon", "Viralagenda León", "León", "León")
}

fn tenerife() -> BronzeSource {
    BronzeSource {
        meta: meta("tenerife_agenda", "Agenda Web Tenerife", "Canarias", "05"),
        listing_url: "https://www.webtenerife.com/que-hacer/agenda/?page={page}".to_string(),
        province: Some("Santa Cruz de Tenerife".to_string()),
        city: None,
        use_renderer: true,
        wait_for: Some(".event-card".to_string()),
        card_selector: ".event-card".to_string(),
        title_selector: ".event-card__title".to_string(),
        date_selector: ".event-card__date".to_string(),
        link_selector: "a".to_string(),
        image_selector: "img".to_string(),
        fetch_details: true,
        max_pages: 2,
    }
}

fn santiago() -> BronzeSource {
    BronzeSource {
        meta: meta(
            "santiago_axenda",
            "Axenda Santiago de Compostela",
            "Galicia",
            "12",
        ),
        listing_url: "https://santiagoturismo.com/axenda".to_string(),
        province: Some("A Coruña".to_string()),
        city: Some("Santiago de Compostela".to_string()),
        use_renderer: true,
        wait_for: Some(".axenda-item".to_string()),
        card_selector: ".axenda-item".to_string(),
        title_selector: "h3".to_string(),
        date_selector: ".data".to_string(),
        link_selector: "a".to_string(),
        image_selector: "img".to_string(),
        fetch_details: false,
        max_pages: 1,
    }
}
