use anyhow::Result;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use flowprompt::flow::catalog::{FlowCatalog, InMemoryFlowCatalog};
use flowprompt::flow::Flow;
use flowprompt::kernel::{FunctionMetadata, Kernel, KernelArguments, KernelPlugin, NativeFunction, ParameterMetadata};
use flowprompt::prompt::{InputVariable, PromptTemplate, PromptTemplateConfig};

const BREAKFAST: &str = r#"
name: breakfast_flow
goal: Make breakfast
provides:
  - breakfast
steps:
  - goal: Make coffee
    plugins:
      - CoffeeMakerPlugin
    provides:
      - coffee
  - flowName: lunch_flow
    completionType: optional
    passthrough:
      - time
  - goal: Serve
    requires:
      - coffee
      - lunch
    provides:
      - breakfast
"#;

const LUNCH: &str = r#"
name: lunch_flow
goal: Make lunch
provides:
  - lunch
steps:
  - goal: Cook lunch
    requires:
      - recipe
    provides:
      - lunch
  - goal: Pick a recipe
    requires:
      - time
    provides:
      - recipe
    completionType: atLeastOnce
"#;

fn kitchen_plugin() -> KernelPlugin {
    let describe = NativeFunction::new(
        FunctionMetadata::new("describe")
            .with_parameter(ParameterMetadata::new("step").required())
            .with_parameter(ParameterMetadata::new("style")),
        |arguments: KernelArguments, _cancellation: CancellationToken| async move {
            let step = arguments.get("step").and_then(Value::as_str).unwrap_or_default().to_string();
            let style = arguments.get("style").and_then(Value::as_str).unwrap_or("plain").to_string();
            Ok(Value::String(format!("[{}] {}", style, step)))
        },
    );
    KernelPlugin::new("kitchen").with_function(describe)
}

#[tokio::main]
async fn main() -> Result<()> {
    let catalog = InMemoryFlowCatalog::with_flows([Flow::from_yaml(BREAKFAST)?, Flow::from_yaml(LUNCH)?]).await?;
    let breakfast = catalog
        .get_flow("breakfast_flow")
        .await
        .ok_or_else(|| anyhow::anyhow!("breakfast_flow is not registered"))?;

    let kernel = Kernel::new().with_plugin(kitchen_plugin());
    let config = PromptTemplateConfig::new("{{$index}}. {{kitchen.describe $goal style=$style}}")
        .with_name("step_line")
        .with_input_variable(InputVariable::new("style").with_default("cheerful"));
    let template = PromptTemplate::with_config(config)?;
    let cancellation = CancellationToken::new();

    println!("{} ({})", breakfast.info.goal, breakfast.name);
    for (index, step) in breakfast.sort_steps()?.into_iter().enumerate() {
        let arguments = KernelArguments::from([
            ("index", Value::from(index + 1)),
            ("goal", Value::from(step.goal())),
        ]);
        let line = template.render(&kernel, &arguments, &cancellation).await?;
        println!("{} <{}>", line, step.completion_type());
    }
    println!("requires: {:?}", breakfast.requires());
    println!("{}", breakfast.to_yaml()?);
    Ok(())
}
