// src/types/deprecated.rs

//! Migrations for deprecated manifest fields
//!
//! Old manifests are accepted on load and rewritten in place: `scripts`
//! blocks become `actions`, and the singular `setVariable` becomes a
//! one-element `setVariables` list. The names of applied migrations are
//! recorded in the package's build metadata.

use crate::types::component::{ZarfAction, ZarfActionSet, ZarfComponent};
use crate::types::package::Variable;

/// Build-metadata marker for the scripts migration
pub const SCRIPTS_TO_ACTIONS: &str = "scripts-to-actions";

/// Build-metadata marker for the setVariable migration
pub const PLURALIZE_SET_VARIABLE: &str = "pluralize-set-variable";

/// All known migration names, in application order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![SCRIPTS_TO_ACTIONS, PLURALIZE_SET_VARIABLE]
}

/// Run every migration on a component, returning the migrated component and
/// warnings describing what changed.
pub fn migrate_component(component: ZarfComponent) -> (ZarfComponent, Vec<String>) {
    let mut warnings = Vec::new();
    let component = migrate_scripts_to_actions(component, &mut warnings);
    let component = migrate_set_variable(component, &mut warnings);
    (component, warnings)
}

fn migrate_scripts_to_actions(
    mut component: ZarfComponent,
    warnings: &mut Vec<String>,
) -> ZarfComponent {
    let Some(scripts) = component.scripts.take() else {
        return component;
    };

    warnings.push(format!(
        "component {:?} uses deprecated scripts, migrating to actions",
        component.name
    ));

    let to_actions = |cmds: &[String]| -> Vec<ZarfAction> {
        cmds.iter()
            .map(|cmd| ZarfAction {
                cmd: Some(cmd.clone()),
                mute: !scripts.show_output,
                max_total_seconds: scripts.timeout_seconds,
                max_retries: if scripts.retry { Some(u32::MAX) } else { None },
                ..Default::default()
            })
            .collect()
    };

    // prepare scripts ran at create time, before/after at deploy time
    let mut on_create = ZarfActionSet::default();
    on_create.before.extend(to_actions(&scripts.prepare));

    let mut on_deploy = ZarfActionSet::default();
    on_deploy.before.extend(to_actions(&scripts.before));
    on_deploy.after.extend(to_actions(&scripts.after));

    if !on_create.is_empty() {
        component.actions.on_create = on_create;
    }
    if !on_deploy.is_empty() {
        component.actions.on_deploy = on_deploy;
    }

    component
}

fn migrate_set_variable(
    mut component: ZarfComponent,
    warnings: &mut Vec<String>,
) -> ZarfComponent {
    let mut migrated = false;

    let sets = [
        &mut component.actions.on_create,
        &mut component.actions.on_deploy,
        &mut component.actions.on_remove,
    ];
    for set in sets {
        for action in set
            .before
            .iter_mut()
            .chain(set.after.iter_mut())
            .chain(set.on_success.iter_mut())
            .chain(set.on_failure.iter_mut())
        {
            if action.set_variable.is_empty() {
                continue;
            }
            let name = std::mem::take(&mut action.set_variable);
            if !action.set_variables.iter().any(|v| v.name == name) {
                action.set_variables.push(Variable {
                    name,
                    ..Default::default()
                });
            }
            migrated = true;
        }
    }

    if migrated {
        warnings.push(format!(
            "component {:?} uses deprecated setVariable, migrating to setVariables",
            component.name
        ));
    }

    component
}
