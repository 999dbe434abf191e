//! Gold sources: official open-data APIs with structured JSON.

use std::collections::BTreeMap;

use cartelera_common::{GoldSource, Pagination, SourceConfig};

use super::meta;

pub(super) fn sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::Gold(madrid()),
        SourceConfig::Gold(catalunya()),
        SourceConfig::Gold(euskadi()),
        SourceConfig::Gold(castilla_leon()),
        SourceConfig::Gold(andalucia()),
    ]
}

fn mappings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(path, field)| (path.to_string(), field.to_string()))
        .collect()
}

/// Madrid city council agenda (JSON-LD flavoured catalog).
fn madrid() -> GoldSource {
    let mut cfg = GoldSource::new(
        meta(
            "madrid_datos_abiertos",
            "Madrid Datos Abiertos",
            "Comunidad de Madrid",
            "13",
        ),
        "https://datos.madrid.es/egob/catalogo/206974-0-agenda-eventos-culturales-100.json",
    );
    cfg.items_path = "@graph".to_string();
    cfg.field_mappings = mappings(&[
        ("id", "external_id"),
        ("title", "title"),
        ("description", "description"),
        ("dtstart", "start_date"),
        ("dtend", "end_date"),
        ("time", "start_time"),
        ("event-location", "venue_name"),
        ("address.area.street-address", "address"),
        ("address.area.locality", "city"),
        ("address.area.postal-code", "postal_code"),
        ("price", "price"),
        ("link", "external_url"),
        ("organization.organization-name", "organizer_name"),
    ]);
    cfg.datetime_format = "%Y-%m-%d %H:%M:%S%.1f".to_string();
    cfg.default_province = Some("Madrid".to_string());
    cfg.free_value = Some("Gratuito".to_string());
    cfg
}

/// Generalitat de Catalunya cultural agenda (Socrata/SODA).
fn catalunya() -> GoldSource {
    let mut cfg = GoldSource::new(
        meta(
            "catalunya_agenda",
            "Agenda Cultural de Catalunya",
            "Cataluña",
            "09",
        ),
        "https://analisi.transparenciacatalunya.cat/resource/rhpv-yr4f.json",
    );
    cfg.pagination = Pagination::Socrata;
    cfg.page_size = 100;
    cfg.field_mappings = mappings(&[
        ("codi", "external_id"),
        ("denominaci", "title"),
        ("descripcio", "description"),
        ("data_inici", "start_date"),
        ("data_fi", "end_date"),
        ("horari", "start_time"),
        ("espai", "venue_name"),
        ("adre_a", "address"),
        ("municipi", "city"),
        ("comarca", "province"),
        ("codi_postal", "postal_code"),
        ("preu", "price"),
        ("enlla_os", "external_url"),
        ("imatges", "image_url"),
    ]);
    cfg.datetime_format = "%Y-%m-%dT%H:%M:%S%.3f".to_string();
    cfg.free_value = Some("Gratuït".to_string());
    cfg
}

/// Basque government Kulturklik API (page-number pagination).
fn euskadi() -> GoldSource {
    let mut cfg = GoldSource::new(
        meta(
            "euskadi_kulturklik",
            "Kulturklik Euskadi",
            "País Vasco",
            "16",
        ),
        "https://api.euskadi.eus/culture/events/v1.0/events",
    );
    cfg.pagination = Pagination::Page;
    cfg.page_param = "_page".to_string();
    cfg.items_path = "items".to_string();
    cfg.total_pages_path = "totalPages".to_string();
    cfg.field_mappings = mappings(&[
        ("id", "external_id"),
        ("nameEs", "title"),
        ("descriptionEs", "description"),
        ("startDate", "start_date"),
        ("endDate", "end_date"),
        ("establishmentEs", "venue_name"),
        ("municipalityEs", "city"),
        ("provinceNameEs", "province"),
        ("priceEs", "price"),
        ("urlEventEs", "external_url"),
        ("images.0.imageUrl", "image_url"),
    ]);
    cfg.datetime_format = "%Y-%m-%dT%H:%M:%SZ".to_string();
    cfg.free_value = Some("Gratuito".to_string());
    cfg
}

/// Junta de Castilla y León open-data records API (offset + limit).
fn castilla_leon() -> GoldSource {
    let mut cfg = GoldSource::new(
        meta(
            "castilla_leon_agenda",
            "Agenda Cultural de Castilla y León",
            "Castilla y León",
            "07",
        ),
        "https://analisis.datosabiertos.jcyl.es/api/records/1.0/search/?dataset=eventos-agenda-cultural",
    );
    cfg.pagination = Pagination::OffsetLimit;
    cfg.offset_param = "start".to_string();
    cfg.limit_param = "rows".to_string();
    cfg.page_size = 100;
    cfg.items_path = "records".to_string();
    cfg.total_count_path = "nhits".to_string();
    cfg.field_mappings = mappings(&[
        ("recordid", "external_id"),
        ("fields.titulo", "title"),
        ("fields.descripcion", "description"),
        ("fields.fecha_inicio", "start_date"),
        ("fields.fecha_fin", "end_date"),
        ("fields.hora_inicio", "start_time"),
        ("fields.lugar_celebracion", "venue_name"),
        ("fields.calle", "address"),
        ("fields.municipio", "city"),
        ("fields.provincia", "province"),
        ("fields.precio", "price"),
        ("fields.enlace", "external_url"),
    ]);
    cfg.date_format = "%Y-%m-%d".to_string();
    cfg.free_value = Some("Gratuito".to_string());
    cfg
}

/// Junta de Andalucía cultural agenda (CKAN datastore, offset + limit).
fn andalucia() -> GoldSource {
    let mut cfg = GoldSource::new(
        meta(
            "andalucia_cultura",
            "Agenda Cultural de Andalucía",
            "Andalucía",
            "01",
        ),
        "https://www.juntadeandalucia.es/datosabiertos/portal/api/3/action/datastore_search?resource_id=agenda-cultural",
    );
    cfg.pagination = Pagination::OffsetLimit;
    cfg.page_size = 100;
    cfg.items_path = "result.records".to_string();
    cfg.total_count_path = "result.total".to_string();
    cfg.field_mappings = mappings(&[
        ("_id", "external_id"),
        ("TITULO", "title"),
        ("DESCRIPCION", "description"),
        ("FECHA_INICIO", "start_date"),
        ("FECHA_FIN", "end_date"),
        ("HORA", "start_time"),
        ("ESPACIO", "venue_name"),
        ("DIRECCION", "address"),
        ("MUNICIPIO", "city"),
        ("PROVINCIA", "province"),
        ("PRECIO", "price"),
        ("URL", "external_url"),
    ]);
    cfg.date_format = "%d/%m/%Y".to_string();
    cfg.free_value = Some("Gratuito".to_string());
    cfg
}
