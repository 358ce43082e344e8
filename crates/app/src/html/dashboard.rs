pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Object Detection</title>
  <style>
    body {
      font-family: Arial, sans-serif;
      margin: 0;
      padding: 20px;
      text-align: center;
    }
    h1 {
      color: #333;
    }
    .container {
      display: flex;
      flex-direction: column;
      align-items: center;
      max-width: 800px;
      margin: 0 auto;
    }
    .controls {
      display: flex;
      gap: 16px;
      align-items: center;
      margin-bottom: 12px;
    }
    img {
      max-width: 100%;
      margin-bottom: 20px;
      border: 1px solid #ddd;
    }
    #detections {
      width: 100%;
      min-height: 100px;
      border: 1px solid #ddd;
      padding: 10px;
      margin-bottom: 20px;
      text-align: left;
    }
  </style>
</head>
<body>
  <div class="container">
    <h1>Object Detection</h1>
    <div class="controls">
      <label><input type="checkbox" id="show-boxes" checked /> Boxes</label>
      <label><input type="checkbox" id="show-labels" checked /> Labels</label>
      <label>
        Confidence
        <input type="range" id="confidence" min="0" max="100" step="1" value="30" />
        <span id="confidence-value">30</span>%
      </label>
    </div>
    <img id="feed" src="/video_feed" alt="Video Feed" />
    <h2>Detections:</h2>
    <div id="detections">Loading...</div>
  </div>
  <script>
    const feed = document.getElementById('feed');
    const boxes = document.getElementById('show-boxes');
    const labels = document.getElementById('show-labels');
    const confidence = document.getElementById('confidence');
    const confidenceValue = document.getElementById('confidence-value');

    function reopenStream() {
      const params = new URLSearchParams({
        show_boxes: boxes.checked,
        show_labels: labels.checked,
        confidence: confidence.value,
      });
      // Drop the old connection first so the camera lease is returned.
      feed.src = '';
      setTimeout(() => { feed.src = '/video_feed?' + params.toString(); }, 250);
    }

    boxes.addEventListener('change', reopenStream);
    labels.addEventListener('change', reopenStream);
    confidence.addEventListener('input', () => { confidenceValue.textContent = confidence.value; });
    confidence.addEventListener('change', reopenStream);

    function renderDetections(data) {
      const target = document.getElementById('detections');
      if (data.detections.length === 0) {
        target.innerHTML = 'No objects detected';
        return;
      }
      let html = '<ul>';
      data.detections.forEach(detection => {
        html += `<li>${detection.label}: ${detection.confidence}%</li>`;
      });
      html += '</ul>';
      target.innerHTML = html;
    }

    setInterval(function () {
      fetch('/detections')
        .then(response => response.json())
        .then(renderDetections)
        .catch(error => console.error('Error fetching detections:', error));
    }, 1000);
  </script>
</body>
</html>
"#;
