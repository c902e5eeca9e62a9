//! Built-in civic catalogue
//!
//! Used when the configuration declares no `[[domains]]` or `[[workflows]]`.
//! Handlers are expected on consecutive local ports starting at 9300.

use civic_domain::{
    CompensationSpec, DomainDescriptor, Endpoint, ResolutionPath, Signature, StepSpec,
    WorkflowDefinition,
};
use serde_json::json;

/// Id of the catch-all domain every catalogue must contain.
pub const GENERAL_DOMAIN: &str = "general";

const BASE_PORT: u16 = 9300;

struct Entry {
    id: &'static str,
    display_name: &'static str,
    keywords: &'static [&'static str],
    resolution_path: ResolutionPath,
}

const ENTRIES: &[Entry] = &[
    Entry {
        id: "parking",
        display_name: "Parking",
        keywords: &["park", "driveway", "car", "vehicle", "meter", "tow"],
        resolution_path: ResolutionPath::CommunityFirst,
    },
    Entry {
        id: "permits",
        display_name: "Permits",
        keywords: &["permit", "license", "build", "renovation", "addition", "zoning"],
        resolution_path: ResolutionPath::Documents,
    },
    Entry {
        id: "noise",
        display_name: "Noise",
        keywords: &["noise", "loud", "music", "bark", "sound", "party"],
        resolution_path: ResolutionPath::CommunityFirst,
    },
    Entry {
        id: "infrastructure",
        display_name: "Infrastructure",
        keywords: &["road", "street", "pothole", "streetlight", "sewer", "utility", "sidewalk"],
        resolution_path: ResolutionPath::LegalDirect,
    },
    Entry {
        id: "business",
        display_name: "Business",
        keywords: &["business", "commercial", "shop", "store", "restaurant"],
        resolution_path: ResolutionPath::Documents,
    },
    Entry {
        id: "religious_events",
        display_name: "Religious & Cultural Events",
        keywords: &["religious", "temple", "church", "mosque", "festival", "ceremony", "cultural"],
        resolution_path: ResolutionPath::Documents,
    },
    Entry {
        id: "neighbor_dispute",
        display_name: "Neighbor Disputes",
        keywords: &["neighbor", "dispute", "fence", "property line", "boundary", "conflict"],
        resolution_path: ResolutionPath::CommunityFirst,
    },
    Entry {
        id: "environmental",
        display_name: "Environmental",
        keywords: &["environment", "pollution", "air quality", "waste", "dumping", "recycle"],
        resolution_path: ResolutionPath::LegalDirect,
    },
    Entry {
        id: "safety",
        display_name: "Public Safety",
        keywords: &["safety", "inspection", "fire", "hazard", "emergency", "smoke"],
        resolution_path: ResolutionPath::LegalDirect,
    },
];

fn local_endpoint(offset: usize) -> Endpoint {
    Endpoint::new(format!("http://localhost:{}", BASE_PORT as usize + offset))
}

/// The built-in domains, `general` last. Every specialised domain falls
/// back to `general`.
pub fn builtin_domains() -> Vec<DomainDescriptor> {
    let mut domains: Vec<DomainDescriptor> = ENTRIES
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            DomainDescriptor::new(entry.id, Signature::keywords(entry.keywords), local_endpoint(i))
                .with_display_name(entry.display_name)
                .with_resolution_path(entry.resolution_path)
                .with_fallbacks([GENERAL_DOMAIN])
        })
        .collect();
    domains.push(
        DomainDescriptor::new(GENERAL_DOMAIN, Signature::empty(), local_endpoint(ENTRIES.len()))
            .with_display_name("General Services"),
    );
    domains
}

/// Opening a restaurant: business license, then zoning review and a safety
/// inspection in parallel, then the final operating permit.
pub fn open_restaurant() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "open_restaurant",
        vec![
            StepSpec::to_domain("business_license", "business")
                .with_input(json!({
                    "business_name": "{{input.name}}",
                    "address": "{{input.address}}",
                    "category": "restaurant",
                }))
                .with_compensation(CompensationSpec::new("withdraw_application").with_payload(
                    json!({ "ticket_id": "{{steps.business_license.result.ticket_id}}" }),
                )),
            StepSpec::to_domain("zoning_review", "permits")
                .after(["business_license"])
                .with_input(json!({
                    "address": "{{input.address}}",
                    "intended_use": "restaurant",
                    "license_ticket": "{{steps.business_license.result.ticket_id}}",
                }))
                .with_compensation(CompensationSpec::new("cancel_review").with_payload(
                    json!({ "ticket_id": "{{steps.zoning_review.result.ticket_id}}" }),
                )),
            StepSpec::classified(
                "safety_inspection",
                "Fire safety inspection for the restaurant {{input.name}} at {{input.address}}",
            )
            .after(["business_license"])
            .with_compensation(CompensationSpec::new("cancel_inspection").with_payload(
                json!({ "ticket_id": "{{steps.safety_inspection.result.ticket_id}}" }),
            )),
            StepSpec::to_domain("final_permit", "permits")
                .after(["zoning_review", "safety_inspection"])
                .with_input(json!({
                    "permit": "food_service_operation",
                    "zoning_ticket": "{{steps.zoning_review.result.ticket_id}}",
                    "inspection_ticket": "{{steps.safety_inspection.result.ticket_id}}",
                })),
        ],
    )
    .with_description("Business license, zoning review and safety inspection, then the operating permit")
}

pub fn builtin_workflows() -> Vec<WorkflowDefinition> {
    vec![open_restaurant()]
}
