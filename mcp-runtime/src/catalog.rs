use std::collections::HashSet;
use std::sync::LazyLock;

use serde_json::{Map, Value, json};

use crate::normalize::Normalizer;
use crate::upstream::UpstreamFailure;

/// Declared type of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Boolean,
    Integer,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Boolean => "boolean",
            ParamKind::Integer => "integer",
        }
    }
}

/// One declared parameter. The same row drives input validation, the
/// upstream query mapping and the catalog rendering, so the documented
/// schema can never drift from the enforced one.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    /// Upstream query key this parameter maps to. Prompts have no upstream
    /// side and leave it unset.
    pub query_key: Option<&'static str>,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

/// One entry of the Tool Catalog. Immutable after construction.
#[derive(Debug, Clone, Copy)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    /// Fixed upstream path, relative to the configured API host.
    pub path: &'static str,
    pub params: &'static [ParamSpec],
    pub normalizer: Normalizer,
}

impl ToolDefinition {
    /// Map validated arguments onto the tool's upstream query keys. Pure:
    /// reads nothing but its own input and the declared parameter table.
    /// Absent optionals and blank values are omitted entirely.
    pub fn map_params(&self, arguments: &Map<String, Value>) -> Vec<(String, String)> {
        let mut query = Vec::new();
        for spec in self.params {
            let Some(query_key) = spec.query_key else {
                continue;
            };
            let Some(value) = arguments.get(spec.name) else {
                continue;
            };
            let Some(rendered) = render_query_value(value) else {
                continue;
            };
            if rendered.is_empty() {
                continue;
            }
            query.push((query_key.to_string(), rendered));
        }
        query
    }
}

fn render_query_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[derive(Debug)]
pub struct PromptMessage {
    pub role: &'static str,
    pub text: String,
}

impl PromptMessage {
    fn user(text: String) -> Self {
        Self { role: "user", text }
    }
}

/// One entry of the Prompt Catalog. The render function is a pure text
/// template — prompts never perform I/O.
#[derive(Clone, Copy)]
pub struct PromptDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub render: fn(&Map<String, Value>) -> Vec<PromptMessage>,
}

/// Validate raw arguments against a declared parameter table.
pub fn validate_input(
    params: &'static [ParamSpec],
    arguments: &Map<String, Value>,
) -> Result<(), UpstreamFailure> {
    for spec in params {
        match arguments.get(spec.name) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(UpstreamFailure::invalid_input(format!(
                        "Missing required parameter '{}'",
                        spec.name
                    )));
                }
            }
            Some(value) => {
                let kind_matches = match spec.kind {
                    ParamKind::String => value.is_string(),
                    ParamKind::Boolean => value.is_boolean(),
                    ParamKind::Integer => value.is_i64() || value.is_u64(),
                };
                if !kind_matches {
                    return Err(UpstreamFailure::invalid_input(format!(
                        "Parameter '{}' must be a {}",
                        spec.name,
                        spec.kind.json_type()
                    )));
                }
                if spec.required
                    && value
                        .as_str()
                        .is_some_and(|text| text.trim().is_empty())
                {
                    return Err(UpstreamFailure::invalid_input(format!(
                        "Parameter '{}' must not be blank",
                        spec.name
                    )));
                }
            }
        }
    }

    for key in arguments.keys() {
        if !params.iter().any(|spec| spec.name == key) {
            return Err(UpstreamFailure::invalid_input(format!(
                "Unknown parameter '{key}'"
            )));
        }
    }

    Ok(())
}

/// Render a parameter table as the JSON Schema exposed through
/// `tools/list`, `prompts/list` and the HTTP discovery document.
pub fn render_input_schema(params: &'static [ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for spec in params {
        properties.insert(
            spec.name.to_string(),
            json!({
                "type": spec.kind.json_type(),
                "description": spec.description,
            }),
        );
        if spec.required {
            required.push(Value::String(spec.name.to_string()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

// ---------------------------------------------------------------------------
// Parameter tables
// ---------------------------------------------------------------------------

static LOOKUP_ONLY: [ParamSpec; 1] = [ParamSpec {
    name: "lookup",
    query_key: Some("LOOKUP"),
    kind: ParamKind::String,
    required: true,
    description: "Domain, subdomain or IP address to look up.",
}];

static COMPANY_TO_URL_PARAMS: [ParamSpec; 2] = [
    ParamSpec {
        name: "company",
        query_key: Some("COMPANY"),
        kind: ParamKind::String,
        required: true,
        description: "Company name to resolve to operated domains.",
    },
    ParamSpec {
        name: "tld",
        query_key: Some("TLD"),
        kind: ParamKind::String,
        required: false,
        description: "Restrict matches to one top-level domain, e.g. 'com'.",
    },
];

static LISTS_PARAMS: [ParamSpec; 3] = [
    ParamSpec {
        name: "technology",
        query_key: Some("TECH"),
        kind: ParamKind::String,
        required: true,
        description: "Technology name to list live websites for.",
    },
    ParamSpec {
        name: "include_meta",
        query_key: Some("META"),
        kind: ParamKind::Boolean,
        required: false,
        description: "Include company metadata for each website.",
    },
    ParamSpec {
        name: "offset",
        query_key: Some("OFFSET"),
        kind: ParamKind::String,
        required: false,
        description: "Pagination token returned by the previous page.",
    },
];

static TRENDS_PARAMS: [ParamSpec; 2] = [
    ParamSpec {
        name: "technology",
        query_key: Some("TECH"),
        kind: ParamKind::String,
        required: true,
        description: "Technology name to chart adoption for.",
    },
    ParamSpec {
        name: "date",
        query_key: Some("DATE"),
        kind: ParamKind::String,
        required: false,
        description: "ISO date to pin the snapshot to. Defaults to the latest index.",
    },
];

static QUERY_ONLY: [ParamSpec; 1] = [ParamSpec {
    name: "query",
    query_key: Some("QUERY"),
    kind: ParamKind::String,
    required: true,
    description: "Free-text search query.",
}];

static TECH_ONLY: [ParamSpec; 1] = [ParamSpec {
    name: "technology",
    query_key: Some("TECH"),
    kind: ParamKind::String,
    required: true,
    description: "Technology name to base recommendations on.",
}];

// ---------------------------------------------------------------------------
// Tool Catalog
// ---------------------------------------------------------------------------

static TOOLS: LazyLock<Vec<ToolDefinition>> = LazyLock::new(|| {
    let tools = vec![
        ToolDefinition {
            name: "domain-lookup",
            description: "Full technology profile for a domain, flattened into one technology list.",
            path: "v21/api.json",
            params: &LOOKUP_ONLY,
            normalizer: Normalizer::TechnologyList,
        },
        ToolDefinition {
            name: "domain-live",
            description: "Live (uncached) technology detection for a domain. Slower but current.",
            path: "dlv1/api.json",
            params: &LOOKUP_ONLY,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "free-lookup",
            description: "Lightweight technology summary available on the free tier.",
            path: "free1/api.json",
            params: &LOOKUP_ONLY,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "domain-history",
            description: "First/last-detected history for every technology seen on a domain.",
            path: "history1/api.json",
            params: &LOOKUP_ONLY,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "company-to-url",
            description: "Resolve a company name to the domains it operates.",
            path: "ctu1/api.json",
            params: &COMPANY_TO_URL_PARAMS,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "keywords",
            description: "Keywords the upstream index associates with a domain.",
            path: "kw2/api.json",
            params: &LOOKUP_ONLY,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "relationships",
            description: "Domains related through shared identifiers, tags or infrastructure.",
            path: "rv2/api.json",
            params: &LOOKUP_ONLY,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "redirects",
            description: "Inbound and outbound redirects recorded for a domain.",
            path: "redirect1/api.json",
            params: &LOOKUP_ONLY,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "lists",
            description: "Paginated list of live websites using a technology.",
            path: "lists11/api.json",
            params: &LISTS_PARAMS,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "trends",
            description: "Adoption, coverage and churn statistics for a technology.",
            path: "trends/v6/api.json",
            params: &TRENDS_PARAMS,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "trust",
            description: "Trust signals for a domain: age, spend class and detected risk markers.",
            path: "trust/v1/api.json",
            params: &LOOKUP_ONLY,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "technology-search",
            description: "Search the technology index by free text.",
            path: "search2/api.json",
            params: &QUERY_ONLY,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "keyword-search",
            description: "Search indexed domains by keyword.",
            path: "kwsearch1/api.json",
            params: &QUERY_ONLY,
            normalizer: Normalizer::Identity,
        },
        ToolDefinition {
            name: "recommendations",
            description: "Technologies commonly deployed alongside a given technology.",
            path: "rec1/api.json",
            params: &TECH_ONLY,
            normalizer: Normalizer::Identity,
        },
    ];
    assert_unique_names("tool", tools.iter().map(|tool| tool.name));
    tools
});

/// The full Tool Catalog, in registration order. First access asserts name
/// uniqueness; a duplicate is a programming error and aborts the process.
pub fn tools() -> &'static [ToolDefinition] {
    &TOOLS
}

pub fn find_tool(name: &str) -> Option<&'static ToolDefinition> {
    TOOLS.iter().find(|tool| tool.name == name)
}

// ---------------------------------------------------------------------------
// Prompt Catalog
// ---------------------------------------------------------------------------

static ANALYZE_DOMAIN_PARAMS: [ParamSpec; 1] = [ParamSpec {
    name: "domain",
    query_key: None,
    kind: ParamKind::String,
    required: true,
    description: "Domain to analyze.",
}];

static COMPARE_DOMAINS_PARAMS: [ParamSpec; 2] = [
    ParamSpec {
        name: "first",
        query_key: None,
        kind: ParamKind::String,
        required: true,
        description: "First domain to compare.",
    },
    ParamSpec {
        name: "second",
        query_key: None,
        kind: ParamKind::String,
        required: true,
        description: "Second domain to compare.",
    },
];

static ADOPTION_REPORT_PARAMS: [ParamSpec; 1] = [ParamSpec {
    name: "technology",
    query_key: None,
    kind: ParamKind::String,
    required: true,
    description: "Technology to report on.",
}];

static COMPANY_STACK_PARAMS: [ParamSpec; 2] = [
    ParamSpec {
        name: "company",
        query_key: None,
        kind: ParamKind::String,
        required: true,
        description: "Company whose web stack should be profiled.",
    },
    ParamSpec {
        name: "tld",
        query_key: None,
        kind: ParamKind::String,
        required: false,
        description: "Optional top-level domain hint, e.g. 'com'.",
    },
];

fn str_arg<'a>(arguments: &'a Map<String, Value>, name: &str) -> &'a str {
    arguments.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn analyze_domain(arguments: &Map<String, Value>) -> Vec<PromptMessage> {
    let domain = str_arg(arguments, "domain");
    vec![PromptMessage::user(format!(
        "Call the domain-lookup tool with lookup set to \"{domain}\". Group the returned \
         technologies by Tag, call out anything security- or performance-relevant, and \
         close with a short plain-language summary of how {domain} is built. If the \
         result says no technologies were found, report that instead of guessing."
    ))]
}

fn compare_domains(arguments: &Map<String, Value>) -> Vec<PromptMessage> {
    let first = str_arg(arguments, "first");
    let second = str_arg(arguments, "second");
    vec![PromptMessage::user(format!(
        "Call the domain-lookup tool twice: once with lookup set to \"{first}\" and once \
         with lookup set to \"{second}\". Then compare the two stacks: technologies they \
         share, technologies unique to each, and any notable difference in hosting or \
         analytics choices. Present the comparison as a short table followed by two or \
         three sentences of interpretation."
    ))]
}

fn technology_adoption_report(arguments: &Map<String, Value>) -> Vec<PromptMessage> {
    let technology = str_arg(arguments, "technology");
    vec![PromptMessage::user(format!(
        "Build an adoption report for \"{technology}\". First call the trends tool with \
         technology set to \"{technology}\" for coverage and churn statistics, then call \
         the lists tool with the same technology for concrete example websites. Combine \
         both into a report covering current adoption, trajectory, and three \
         representative sites."
    ))]
}

fn company_stack(arguments: &Map<String, Value>) -> Vec<PromptMessage> {
    let company = str_arg(arguments, "company");
    let tld = str_arg(arguments, "tld");
    let mut text = format!(
        "Call the company-to-url tool with company set to \"{company}\""
    );
    if !tld.is_empty() {
        text.push_str(&format!(" and tld set to \"{tld}\""));
    }
    text.push_str(
        ". Pick the most plausible primary domain from the response, then call the \
         domain-lookup tool on it and summarize the company's web stack. Mention which \
         domain you picked and why.",
    );
    vec![PromptMessage::user(text)]
}

static PROMPTS: LazyLock<Vec<PromptDefinition>> = LazyLock::new(|| {
    let prompts = vec![
        PromptDefinition {
            name: "analyze-domain",
            description: "Profile one domain's technology stack and summarize it.",
            params: &ANALYZE_DOMAIN_PARAMS,
            render: analyze_domain,
        },
        PromptDefinition {
            name: "compare-domains",
            description: "Compare the technology stacks of two domains.",
            params: &COMPARE_DOMAINS_PARAMS,
            render: compare_domains,
        },
        PromptDefinition {
            name: "technology-adoption-report",
            description: "Adoption statistics and example deployments for a technology.",
            params: &ADOPTION_REPORT_PARAMS,
            render: technology_adoption_report,
        },
        PromptDefinition {
            name: "company-stack",
            description: "Resolve a company to its primary domain and profile its stack.",
            params: &COMPANY_STACK_PARAMS,
            render: company_stack,
        },
    ];
    assert_unique_names("prompt", prompts.iter().map(|prompt| prompt.name));
    prompts
});

/// The full Prompt Catalog, in registration order.
pub fn prompts() -> &'static [PromptDefinition] {
    &PROMPTS
}

pub fn find_prompt(name: &str) -> Option<&'static PromptDefinition> {
    PROMPTS.iter().find(|prompt| prompt.name == name)
}

fn assert_unique_names<'a>(kind: &str, names: impl Iterator<Item = &'a str>) {
    let mut seen = HashSet::new();
    for name in names {
        assert!(seen.insert(name), "duplicate {kind} name in catalog: {name}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_exposes_all_fourteen_tools_with_exact_upstream_mapping() {
        // The authoritative integration surface: tool name, upstream path,
        // and the uppercase query keys, in registration order.
        let expected: [(&str, &str, &[&str]); 14] = [
            ("domain-lookup", "v21/api.json", &["LOOKUP"]),
            ("domain-live", "dlv1/api.json", &["LOOKUP"]),
            ("free-lookup", "free1/api.json", &["LOOKUP"]),
            ("domain-history", "history1/api.json", &["LOOKUP"]),
            ("company-to-url", "ctu1/api.json", &["COMPANY", "TLD"]),
            ("keywords", "kw2/api.json", &["LOOKUP"]),
            ("relationships", "rv2/api.json", &["LOOKUP"]),
            ("redirects", "redirect1/api.json", &["LOOKUP"]),
            ("lists", "lists11/api.json", &["TECH", "META", "OFFSET"]),
            ("trends", "trends/v6/api.json", &["TECH", "DATE"]),
            ("trust", "trust/v1/api.json", &["LOOKUP"]),
            ("technology-search", "search2/api.json", &["QUERY"]),
            ("keyword-search", "kwsearch1/api.json", &["QUERY"]),
            ("recommendations", "rec1/api.json", &["TECH"]),
        ];

        let tools = tools();
        assert_eq!(tools.len(), expected.len());
        for (tool, (name, path, keys)) in tools.iter().zip(expected) {
            assert_eq!(tool.name, name);
            assert_eq!(tool.path, path);
            let declared: Vec<&str> = tool
                .params
                .iter()
                .filter_map(|spec| spec.query_key)
                .collect();
            assert_eq!(declared, keys, "query keys for {name}");
        }
    }

    #[test]
    fn only_domain_lookup_carries_the_flattening_normalizer() {
        for tool in tools() {
            let expected = if tool.name == "domain-lookup" {
                Normalizer::TechnologyList
            } else {
                Normalizer::Identity
            };
            assert_eq!(tool.normalizer, expected, "normalizer for {}", tool.name);
        }
    }

    #[test]
    fn prompt_params_have_no_upstream_side() {
        for prompt in prompts() {
            for spec in prompt.params {
                assert!(spec.query_key.is_none(), "{}/{}", prompt.name, spec.name);
            }
        }
    }

    #[test]
    fn validation_rejects_missing_blank_and_mistyped_required_params() {
        let params = find_tool("domain-lookup").unwrap().params;

        let missing = validate_input(params, &Map::new()).unwrap_err();
        assert!(missing.message.contains("lookup"));

        let mut blank = Map::new();
        blank.insert("lookup".to_string(), json!("   "));
        assert!(validate_input(params, &blank).is_err());

        let mut mistyped = Map::new();
        mistyped.insert("lookup".to_string(), json!(42));
        let err = validate_input(params, &mistyped).unwrap_err();
        assert!(err.message.contains("must be a string"));
    }

    #[test]
    fn validation_rejects_unknown_parameters() {
        let params = find_tool("domain-lookup").unwrap().params;
        let mut arguments = Map::new();
        arguments.insert("lookup".to_string(), json!("example.com"));
        arguments.insert("verbose".to_string(), json!(true));
        let err = validate_input(params, &arguments).unwrap_err();
        assert!(err.message.contains("verbose"));
    }

    #[test]
    fn validation_accepts_absent_optionals_and_declared_kinds() {
        let params = find_tool("lists").unwrap().params;

        let mut minimal = Map::new();
        minimal.insert("technology".to_string(), json!("Shopify"));
        assert!(validate_input(params, &minimal).is_ok());

        let mut full = Map::new();
        full.insert("technology".to_string(), json!("Shopify"));
        full.insert("include_meta".to_string(), json!(true));
        full.insert("offset".to_string(), json!("page-2-token"));
        assert!(validate_input(params, &full).is_ok());

        let mut bad_flag = Map::new();
        bad_flag.insert("technology".to_string(), json!("Shopify"));
        bad_flag.insert("include_meta".to_string(), json!("yes"));
        assert!(validate_input(params, &bad_flag).is_err());
    }

    #[test]
    fn param_mapping_skips_absent_and_blank_values() {
        let tool = find_tool("lists").unwrap();

        let mut arguments = Map::new();
        arguments.insert("technology".to_string(), json!("Shopify"));
        arguments.insert("offset".to_string(), json!(""));
        assert_eq!(
            tool.map_params(&arguments),
            vec![("TECH".to_string(), "Shopify".to_string())]
        );

        arguments.insert("include_meta".to_string(), json!(true));
        arguments.insert("offset".to_string(), json!("page-2-token"));
        assert_eq!(
            tool.map_params(&arguments),
            vec![
                ("TECH".to_string(), "Shopify".to_string()),
                ("META".to_string(), "true".to_string()),
                ("OFFSET".to_string(), "page-2-token".to_string()),
            ]
        );
    }

    #[test]
    fn rendered_schema_mirrors_the_declared_shape() {
        let schema = render_input_schema(find_tool("company-to-url").unwrap().params);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"], json!(["company"]));
        assert_eq!(schema["properties"]["company"]["type"], "string");
        assert_eq!(schema["properties"]["tld"]["type"], "string");
        assert!(
            schema["properties"]["tld"]["description"]
                .as_str()
                .is_some_and(|text| !text.is_empty())
        );
    }

    #[test]
    fn prompts_reference_catalog_tools_by_name() {
        let mut arguments = Map::new();
        arguments.insert("domain".to_string(), json!("example.com"));
        let messages = (find_prompt("analyze-domain").unwrap().render)(&arguments);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
        assert!(messages[0].text.contains("domain-lookup"));
        assert!(messages[0].text.contains("example.com"));

        let mut arguments = Map::new();
        arguments.insert("company".to_string(), json!("Acme Corp"));
        let messages = (find_prompt("company-stack").unwrap().render)(&arguments);
        assert!(messages[0].text.contains("company-to-url"));
        assert!(messages[0].text.contains("domain-lookup"));
        assert!(!messages[0].text.contains("tld set to"));

        arguments.insert("tld".to_string(), json!("com"));
        let messages = (find_prompt("company-stack").unwrap().render)(&arguments);
        assert!(messages[0].text.contains("tld set to \"com\""));
    }
}
