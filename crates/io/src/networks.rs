//! Header alias tables for supported ad network statement exports.
//!
//! Every network names the same handful of columns differently ("Placement ID"
//! vs "Zone ID" vs "Instance ID" vs "Ad Space ID"). A [`NetworkSchema`] lists,
//! per canonical field, the header spellings one export version is known to
//! use. Matching is done on [`header_key`] so case, surrounding whitespace and
//! `_` vs space never matter.

/// Networks with a statement schema, in the order they were onboarded.
pub const SUPPORTED_NETWORKS: [&str; 14] = [
    "admob",
    "applovin",
    "unity",
    "ironsource",
    "meta",
    "fyber",
    "chartboost",
    "moloco",
    "vungle",
    "pangle",
    "inmobi",
    "appodeal",
    "admost",
    "mintegral",
];

/// Reporting currency assumed when an export carries no currency column.
pub const DEFAULT_CURRENCY: &str = "USD";

// Columns most networks spell the same way.
const FORMAT: &[&str] = &["format", "ad format", "ad type", "adtype", "placement type"];
const CURRENCY: &[&str] = &["currency", "currency code", "payout currency"];
const IMPRESSIONS: &[&str] = &["impressions", "imps", "impression", "ad impressions", "paid impressions"];
const CLICKS: &[&str] = &["clicks", "click"];
const COUNTRY: &[&str] = &["country", "country code", "geo"];

#[derive(Debug)]
pub struct NetworkSchema {
    pub network: &'static str,
    pub version: &'static str,
    pub date: &'static [&'static str],
    pub app_id: &'static [&'static str],
    pub ad_unit_id: &'static [&'static str],
    pub country: &'static [&'static str],
    pub revenue: &'static [&'static str],
    /// Empty when the export never reports IVT adjustments.
    pub ivt: &'static [&'static str],
}

impl NetworkSchema {
    pub fn format(&self) -> &'static [&'static str] {
        FORMAT
    }

    pub fn currency(&self) -> &'static [&'static str] {
        CURRENCY
    }

    pub fn impressions(&self) -> &'static [&'static str] {
        IMPRESSIONS
    }

    pub fn clicks(&self) -> &'static [&'static str] {
        CLICKS
    }
}

/// Known schemas. Versions of one network are listed oldest first.
static SCHEMAS: &[NetworkSchema] = &[
    NetworkSchema {
        network: "admob",
        version: "v1",
        date: &["date"],
        app_id: &["app id", "app"],
        ad_unit_id: &["ad unit id", "ad unit"],
        country: COUNTRY,
        revenue: &["estimated earnings", "earnings"],
        ivt: &[],
    },
    NetworkSchema {
        network: "admob",
        version: "v2",
        date: &["date"],
        app_id: &["app id"],
        ad_unit_id: &["ad unit id"],
        country: &["country code", "country"],
        revenue: &["estimated earnings usd", "estimated earnings"],
        ivt: &["ivt deductions", "invalid traffic deductions"],
    },
    NetworkSchema {
        network: "applovin",
        version: "v1",
        date: &["day", "date"],
        app_id: &["package name", "application"],
        ad_unit_id: &["zone id", "ad unit id"],
        country: COUNTRY,
        revenue: &["revenue", "estimated revenue"],
        ivt: &[],
    },
    NetworkSchema {
        network: "applovin",
        version: "v2",
        date: &["day"],
        app_id: &["package name"],
        ad_unit_id: &["max ad unit id", "ad unit id"],
        country: COUNTRY,
        revenue: &["estimated revenue", "revenue"],
        ivt: &["ivt adjustment", "ivt adjustments"],
    },
    NetworkSchema {
        network: "unity",
        version: "v1",
        date: &["date", "day"],
        app_id: &["source game id", "game id"],
        ad_unit_id: &["placement id", "placement"],
        country: &["country code", "country"],
        revenue: &["revenue sum", "revenue"],
        ivt: &["ivt adjustments"],
    },
    NetworkSchema {
        network: "ironsource",
        version: "v1",
        date: &["date"],
        app_id: &["app key", "application key"],
        ad_unit_id: &["instance id", "instance"],
        country: COUNTRY,
        revenue: &["revenue", "earnings"],
        ivt: &[],
    },
    NetworkSchema {
        network: "ironsource",
        version: "v2",
        date: &["day", "date"],
        app_id: &["appkey", "app key"],
        ad_unit_id: &["instanceid", "instance id"],
        country: &["countrycode", "country"],
        revenue: &["revenue"],
        ivt: &["ivt"],
    },
    NetworkSchema {
        network: "meta",
        version: "v1",
        date: &["date", "time"],
        app_id: &["app id", "property id"],
        ad_unit_id: &["placement id", "placement"],
        country: COUNTRY,
        revenue: &["estimated revenue", "revenue"],
        ivt: &["invalid traffic", "ivt adjustments"],
    },
    NetworkSchema {
        network: "fyber",
        version: "v1",
        date: &["date"],
        app_id: &["app id", "app name"],
        ad_unit_id: &["spot id", "placement id"],
        country: COUNTRY,
        revenue: &["revenue usd", "revenue"],
        ivt: &[],
    },
    NetworkSchema {
        network: "chartboost",
        version: "v1",
        date: &["date", "dt"],
        app_id: &["app id", "app"],
        ad_unit_id: &["location", "ad location"],
        country: COUNTRY,
        revenue: &["money earned", "earnings"],
        ivt: &[],
    },
    NetworkSchema {
        network: "moloco",
        version: "v1",
        date: &["date", "utc date"],
        app_id: &["app bundle", "app id"],
        ad_unit_id: &["ad unit id", "ad unit"],
        country: COUNTRY,
        revenue: &["publisher revenue", "revenue"],
        ivt: &["ivt adjustments"],
    },
    NetworkSchema {
        network: "vungle",
        version: "v1",
        date: &["date"],
        app_id: &["application id", "app id"],
        ad_unit_id: &["placement reference id", "placement id"],
        country: COUNTRY,
        revenue: &["revenue"],
        ivt: &[],
    },
    NetworkSchema {
        network: "pangle",
        version: "v1",
        date: &["date"],
        app_id: &["app id", "site id"],
        ad_unit_id: &["ad slot id", "code id"],
        country: &["region", "country"],
        revenue: &["revenue(usd)", "estimated revenue", "revenue"],
        ivt: &[],
    },
    NetworkSchema {
        network: "inmobi",
        version: "v1",
        date: &["date"],
        app_id: &["app id", "site id"],
        ad_unit_id: &["placement id", "placement"],
        country: COUNTRY,
        revenue: &["earnings", "earnings usd"],
        ivt: &[],
    },
    NetworkSchema {
        network: "appodeal",
        version: "v1",
        date: &["date"],
        app_id: &["app key", "app"],
        ad_unit_id: &["ad space id", "ad space"],
        country: COUNTRY,
        revenue: &["revenue"],
        ivt: &[],
    },
    NetworkSchema {
        network: "admost",
        version: "v1",
        date: &["date"],
        app_id: &["app id", "application"],
        ad_unit_id: &["zone id", "zone"],
        country: COUNTRY,
        revenue: &["revenue", "estimated revenue"],
        ivt: &[],
    },
    NetworkSchema {
        network: "mintegral",
        version: "v1",
        date: &["date"],
        app_id: &["app id", "package name"],
        ad_unit_id: &["unit id", "placement id"],
        country: COUNTRY,
        revenue: &["est. revenue", "revenue"],
        ivt: &[],
    },
];

/// Outcome of looking up a schema version.
#[derive(Debug)]
pub struct ResolvedSchema {
    pub schema: &'static NetworkSchema,
    /// The requested version was unknown and the latest one is used instead.
    pub fell_back: bool,
}

pub fn is_supported(network: &str) -> bool {
    SUPPORTED_NETWORKS.contains(&network)
}

/// Versions known for `network`, oldest first.
pub fn versions(network: &str) -> Vec<&'static str> {
    SCHEMAS
        .iter()
        .filter(|s| s.network == network)
        .map(|s| s.version)
        .collect()
}

/// Find the schema for `network` at `version`. An unknown version of a known
/// network resolves to that network's latest schema.
pub fn resolve(network: &str, version: &str) -> Option<ResolvedSchema> {
    let candidates: Vec<&'static NetworkSchema> =
        SCHEMAS.iter().filter(|s| s.network == network).collect();
    let latest = *candidates.last()?;
    let wanted = version.trim().to_ascii_lowercase();
    match candidates.into_iter().find(|s| s.version == wanted) {
        Some(schema) => Some(ResolvedSchema { schema, fell_back: false }),
        None => Some(ResolvedSchema { schema: latest, fell_back: true }),
    }
}

/// Comparison key for a header cell: trimmed, lower-cased, `_` and runs of
/// whitespace collapsed to one space.
pub fn header_key(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
