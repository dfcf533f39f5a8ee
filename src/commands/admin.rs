use crate::cli::{ResourceTypeCommands, TemplateCommands};
use vibeprocess::registry::ResourceType;
use vibeprocess::{Error, Manager, Template};

pub fn run_template(manager: &Manager, cmd: &TemplateCommands) -> anyhow::Result<()> {
    match cmd {
        TemplateCommands::List => {
            let mut templates = manager
                .store()
                .with(|doc| doc.templates.values().cloned().collect::<Vec<_>>());
            templates.sort_by(|a, b| a.id.cmp(&b.id));
            for tmpl in templates {
                println!("{:<20} {}", tmpl.id, tmpl.label);
            }
        }
        TemplateCommands::Add { file } => {
            let data = std::fs::read_to_string(file)?;
            let tmpl: Template = serde_json::from_str(&data)?;
            if tmpl.id.is_empty() {
                anyhow::bail!("template file has no id");
            }
            let id = tmpl.id.clone();
            manager.store().with_mut(|doc| {
                doc.templates.insert(id.clone(), tmpl);
            });
            manager.store().save()?;
            println!("Added template: {}", id);
        }
        TemplateCommands::Show { id } => {
            let tmpl = manager
                .store()
                .template(id)
                .ok_or_else(|| Error::TemplateNotFound(id.clone()))?;
            println!("{}", serde_json::to_string_pretty(&tmpl)?);
        }
        TemplateCommands::Remove { id } => {
            let removed = manager
                .store()
                .with_mut(|doc| doc.templates.remove(id).is_some());
            if !removed {
                return Err(Error::TemplateNotFound(id.clone()).into());
            }
            manager.store().save()?;
            println!("Removed template: {}", id);
        }
    }
    Ok(())
}

pub fn run_resource_type(manager: &Manager, cmd: &ResourceTypeCommands) -> anyhow::Result<()> {
    match cmd {
        ResourceTypeCommands::List => {
            let mut types = manager
                .store()
                .with(|doc| doc.types.values().cloned().collect::<Vec<_>>());
            types.sort_by(|a, b| a.name.cmp(&b.name));
            for rt in types {
                if rt.counter {
                    println!(
                        "{:<15} counter {}-{} check={}",
                        rt.name,
                        rt.start,
                        rt.end,
                        if rt.check.is_empty() { "(none)" } else { &rt.check }
                    );
                } else {
                    println!(
                        "{:<15} explicit check={}",
                        rt.name,
                        if rt.check.is_empty() { "(none)" } else { &rt.check }
                    );
                }
            }
        }
        ResourceTypeCommands::Add {
            name,
            check,
            counter,
            start,
            end,
        } => {
            if *counter && end < start {
                anyhow::bail!("counter range is empty: start={} end={}", start, end);
            }
            let rt = ResourceType {
                name: name.clone(),
                check: check.clone(),
                counter: *counter,
                start: *start,
                end: *end,
            };
            manager.store().with_mut(|doc| {
                doc.types.insert(name.clone(), rt);
            });
            manager.store().save()?;
            println!("Added resource type: {}", name);
        }
        ResourceTypeCommands::Remove { name } => {
            let in_use = manager.store().with(|doc| {
                doc.resources
                    .values()
                    .filter(|r| vibeprocess::registry::base_type_name(&doc.types, &r.rtype) == *name)
                    .count()
            });
            if in_use > 0 {
                return Err(Error::ResourceTypeInUse {
                    rtype: name.clone(),
                    count: in_use,
                }
                .into());
            }
            let removed = manager
                .store()
                .with_mut(|doc| doc.types.remove(name).is_some());
            if !removed {
                return Err(Error::UnknownResourceType(name.clone()).into());
            }
            manager.store().save()?;
            println!("Removed resource type: {}", name);
        }
    }
    Ok(())
}
