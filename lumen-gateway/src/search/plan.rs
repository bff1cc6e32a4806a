//! The search plan builder: classification → execution policy.

use lumen_api_core::models::SearchPlanOut;

use super::classify::{Classification, Intent, Target};

pub const DEFAULT_LIMIT: u32 = 20;
pub const DISCOVER_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct SearchPlan {
    pub intent: Intent,
    pub target_kind: Option<String>,
    pub base_kinds: Option<Vec<String>>,
    pub limit: u32,
    pub offset: u32,
    pub no_query: bool,
}

impl SearchPlan {
    pub fn to_out(&self) -> SearchPlanOut {
        SearchPlanOut {
            intent: self.intent.as_str().to_owned(),
            target_kind: self.target_kind.clone(),
            base_kinds: self.base_kinds.clone(),
            limit: self.limit,
            offset: self.offset,
            no_query: self.no_query,
        }
    }
}

fn kinds(list: &[&str]) -> Option<Vec<String>> {
    Some(list.iter().map(|s| (*s).to_owned()).collect())
}

/// Build the execution plan from the classification and request knobs.
pub fn build_plan(
    cls: &Classification,
    req_limit: Option<u32>,
    req_offset: Option<u32>,
    facet: Option<&str>,
) -> SearchPlan {
    let mut no_query = false;
    let mut base_kinds = None;
    let mut default_limit = DEFAULT_LIMIT;

    match cls.intent {
        Intent::Navigation => no_query = true,
        Intent::Question => base_kinds = kinds(&["doc", "site"]),
        Intent::Content => base_kinds = kinds(&["image", "media"]),
        Intent::Discover => default_limit = DISCOVER_LIMIT,
        Intent::Download => base_kinds = kinds(&["file", "code", "doc"]),
        Intent::Action | Intent::Unknown => {}
    }

    // Explore-everything mode overrides whatever the intent picked.
    if facet == Some("everything") {
        base_kinds = kinds(&["html", "text", "image", "doc"]);
    }

    let limit = req_limit.unwrap_or(default_limit).clamp(1, MAX_LIMIT);
    let offset = req_offset.unwrap_or(0);

    let target_kind = match cls.target {
        Some(Target::Mixed) | None => None,
        Some(t) => Some(t.as_str().to_owned()),
    };

    SearchPlan {
        intent: cls.intent,
        target_kind,
        base_kinds,
        limit,
        offset,
        no_query,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cls(intent: Intent, target: Option<Target>) -> Classification {
        Classification {
            intent,
            intent_confidence: 1.0,
            target,
            target_confidence: 1.0,
        }
    }

    #[test]
    fn intent_policies() {
        let plan = build_plan(&cls(Intent::Navigation, None), None, None, None);
        assert!(plan.no_query);

        let plan = build_plan(&cls(Intent::Question, None), None, None, None);
        assert_eq!(plan.base_kinds, kinds(&["doc", "site"]));

        let plan = build_plan(&cls(Intent::Content, None), None, None, None);
        assert_eq!(plan.base_kinds, kinds(&["image", "media"]));

        let plan = build_plan(&cls(Intent::Discover, None), None, None, None);
        assert_eq!(plan.limit, DISCOVER_LIMIT);

        let plan = build_plan(&cls(Intent::Download, None), None, None, None);
        assert_eq!(plan.base_kinds, kinds(&["file", "code", "doc"]));
    }

    #[test]
    fn limits_clamp() {
        let c = cls(Intent::Unknown, None);
        assert_eq!(build_plan(&c, None, None, None).limit, DEFAULT_LIMIT);
        assert_eq!(build_plan(&c, Some(0), None, None).limit, 1);
        assert_eq!(build_plan(&c, Some(5000), None, None).limit, MAX_LIMIT);
        // explicit limit beats the discover bump
        let d = cls(Intent::Discover, None);
        assert_eq!(build_plan(&d, Some(10), None, None).limit, 10);
    }

    #[test]
    fn everything_facet_overrides() {
        let plan = build_plan(
            &cls(Intent::Download, None),
            None,
            None,
            Some("everything"),
        );
        assert_eq!(plan.base_kinds, kinds(&["html", "text", "image", "doc"]));
    }

    #[test]
    fn mixed_target_is_no_kind() {
        let plan = build_plan(
            &cls(Intent::Unknown, Some(Target::Mixed)),
            None,
            None,
            None,
        );
        assert_eq!(plan.target_kind, None);

        let plan = build_plan(
            &cls(Intent::Unknown, Some(Target::Image)),
            None,
            None,
            None,
        );
        assert_eq!(plan.target_kind.as_deref(), Some("image"));
    }
}
