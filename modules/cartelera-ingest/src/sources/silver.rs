//! Silver sources: municipal feeds (RSS/Atom/iCal).

use std::collections::BTreeMap;

use cartelera_common::{FeedKind, SilverSource, SourceConfig};

use super::meta;

pub(super) fn sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::Silver(zaragoza()),
        SourceConfig::Silver(valencia()),
        SourceConfig::Silver(bilbao()),
        SourceConfig::Silver(rioja()),
    ]
}

fn zaragoza() -> SilverSource {
    SilverSource {
        meta: meta(
            "zaragoza_agenda",
            "Agenda Zaragoza Cultura",
            "Aragón",
            "02",
        ),
        url: "https://www.zaragoza.es/sede/servicio/cultura/evento.rss".to_string(),
        feed_kind: FeedKind::Rss,
        fetch_details: false,
        field_selectors: BTreeMap::new(),
    }
}

fn valencia() -> SilverSource {
    SilverSource {
        meta: meta(
            "valencia_agenda",
            "Agenda Cultural de València",
            "Comunidad Valenciana",
            "10",
        ),
        url: "https://www.valencia.es/cas/agenda/rss".to_string(),
        feed_kind: FeedKind::Rss,
        fetch_details: true,
        field_selectors: BTreeMap::from([
            ("venue".to_string(), ".evento-lugar".to_string()),
            ("image".to_string(), ".evento-imagen img@src".to_string()),
        ]),
    }
}

fn bilbao() -> SilverSource {
    SilverSource {
        meta: meta("bilbao_agenda", "Agenda Bilbao Kultura", "País Vasco", "16"),
        url: "https://www.bilbao.eus/agenda/eventos.ics".to_string(),
        feed_kind: FeedKind::Ical,
        fetch_details: false,
        field_selectors: BTreeMap::new(),
    }
}

fn rioja() -> SilverSource {
    SilverSource {
        meta: meta(
            "larioja_agenda",
            "Agenda Cultural de La Rioja",
            "La Rioja",
            "17",
        ),
        url: "https://www.larioja.org/agenda/rss".to_string(),
        feed_kind: FeedKind::Rss,
        fetch_details: false,
        field_selectors: BTreeMap::new(),
    }
}
